//! InfluxDB write client.
//!
//! [`Endpoint`] parses the configured URL and splits off embedded credentials.
//! [`InfluxClient`] posts a [`BatchPoints`] to `<endpoint>/write` over HTTP/1.1
//! (plain or TLS) exactly once. The [`Connect`] and [`WriteClient`] traits are the
//! seam the dispatcher is written against, so tests can swap in a recorder.

// Local crates
use crate::{
    helpers::load_config::redact_password,
    point::point::{BatchPoints, Precision},
};

// External crates
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    Method, Request, StatusCode, Uri,
    header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use tracing::instrument;

/// Endpoint URL problems, detected before any network activity.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    /// The URL does not parse.
    #[error("invalid endpoint URL {url:?}: {reason}")]
    Malformed {
        /// The URL with its password redacted.
        url: String,
        /// Parser message.
        reason: String,
    },
    /// No `http://` or `https://` prefix. Carries the redacted URL.
    #[error("endpoint URL {0:?} has no scheme")]
    MissingScheme(String),
    /// Any scheme other than http or https.
    #[error("unsupported endpoint scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),
    /// Empty host. Carries the redacted URL.
    #[error("endpoint URL {0:?} has no host")]
    MissingHost(String),
}

/// Failures while submitting a batch.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The request could not be assembled.
    #[error("could not build write request: {0}")]
    Request(#[from] hyper::http::Error),
    /// Connection, TLS or I/O failure before a response arrived.
    #[error("could not reach {endpoint}: {cause}")]
    Transport {
        /// Endpoint without credentials.
        endpoint: String,
        /// Flattened error chain of the transport failure.
        cause: String,
    },
    /// The store answered with a non-success status.
    #[error("server responded with status {status}: {cause}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// The store's `error` message, or the raw body.
        cause: String,
    },
}

/// Basic auth credentials taken from the URL user-info.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Percent-decoded user name.
    pub username: String,
    /// Percent-decoded password, empty when the URL has none.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    fn authorization(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

/// A parsed endpoint: base URL without user-info plus optional credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: String,
    authority: String,
    base_path: String,
    credentials: Option<Credentials>,
}

impl Endpoint {
    /// Parse `scheme://[user[:pass]@]host[:port][/path]`.
    ///
    /// - Only `http` and `https` are accepted.
    /// - User and password are percent-decoded.
    /// - A user without a password gets an empty password.
    ///
    /// Errors only ever carry the URL with its password redacted.
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let uri: Uri = raw.parse().map_err(|e: hyper::http::uri::InvalidUri| {
            EndpointError::Malformed {
                url: redact_password(raw),
                reason: e.to_string(),
            }
        })?;

        let scheme = uri
            .scheme_str()
            .ok_or_else(|| EndpointError::MissingScheme(redact_password(raw)))?
            .to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(EndpointError::UnsupportedScheme(scheme));
        }

        let authority = uri
            .authority()
            .ok_or_else(|| EndpointError::MissingHost(redact_password(raw)))?;
        if authority.host().is_empty() {
            return Err(EndpointError::MissingHost(redact_password(raw)));
        }

        let (credentials, host_port) = match authority.as_str().rsplit_once('@') {
            Some((userinfo, host_port)) => {
                let (user, pass) = userinfo.split_once(':').unwrap_or((userinfo, ""));
                let credentials = Credentials {
                    username: decode_userinfo(user, raw)?,
                    password: decode_userinfo(pass, raw)?,
                };
                (Some(credentials), host_port)
            }
            None => (None, authority.as_str()),
        };

        Ok(Self {
            scheme,
            authority: host_port.to_string(),
            base_path: uri.path().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Credentials from the URL user-info, if any.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Base URL without credentials, safe to log.
    #[must_use]
    pub fn display_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority, self.base_path)
    }

    /// `<base>/write?db=<database>&precision=<p>`
    pub fn write_uri(&self, database: &str, precision: Precision) -> Result<Uri, hyper::http::Error> {
        let db = utf8_percent_encode(database, NON_ALPHANUMERIC);
        Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(self.authority.as_str())
            .path_and_query(format!("{}/write?db={db}&precision={precision}", self.base_path))
            .build()
    }
}

fn decode_userinfo(part: &str, raw: &str) -> Result<String, EndpointError> {
    percent_decode_str(part)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| EndpointError::Malformed {
            url: redact_password(raw),
            reason: e.to_string(),
        })
}

/// Submits a batch to the store.
pub trait WriteClient {
    /// Send `batch` once. No retries.
    fn write(&self, batch: &BatchPoints) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// Opens a [`WriteClient`] bound to an endpoint.
pub trait Connect {
    /// Client produced by this connector.
    type Client: WriteClient;

    /// Bind a client to `endpoint`. No I/O happens until the first write.
    fn connect(&self, endpoint: Endpoint) -> Self::Client;
}

/// Production connector: hyper client over plain TCP or rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfluxConnector;

impl Connect for InfluxConnector {
    type Client = InfluxClient;

    fn connect(&self, endpoint: Endpoint) -> InfluxClient {
        InfluxClient::new(endpoint)
    }
}

/// HTTP client for one endpoint.
#[derive(Debug)]
pub struct InfluxClient {
    endpoint: Endpoint,
    http: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl InfluxClient {
    #[instrument(
        name = "influx_client::create",
        target = "client::client::InfluxClient",
        skip_all,
        level = "debug"
    )]
    /// Client speaking plain HTTP or TLS depending on the endpoint scheme.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        tracing::debug!(
            endpoint = %endpoint.display_url(),
            authenticated = endpoint.credentials().is_some(),
            "Creating HTTP client for InfluxDB endpoint"
        );
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let http = Client::builder(TokioExecutor::new()).build(connector);

        Self { endpoint, http }
    }
}

impl WriteClient for InfluxClient {
    #[instrument(
        name = "influx_client::write",
        target = "client::client::InfluxClient",
        skip_all,
        level = "debug"
    )]
    async fn write(&self, batch: &BatchPoints) -> Result<(), WriteError> {
        let uri = self.endpoint.write_uri(batch.database(), batch.precision())?;
        let body = batch.to_line_protocol();
        tracing::debug!(
            uri = %uri,
            points = batch.points().len(),
            body_bytes = body.len(),
            "Posting line protocol batch to InfluxDB"
        );

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(USER_AGENT, concat!("annotate-influxdb/", env!("CARGO_PKG_VERSION")));
        if let Some(credentials) = self.endpoint.credentials() {
            request = request.header(AUTHORIZATION, credentials.authorization());
        }
        let request = request.body(Full::new(Bytes::from(body)))?;

        let transport_error = |cause: String| WriteError::Transport {
            endpoint: self.endpoint.display_url(),
            cause,
        };
        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| transport_error(error_chain(&e)))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| transport_error(error_chain(&e)))?
            .to_bytes();

        if status == StatusCode::NO_CONTENT || status == StatusCode::OK {
            tracing::debug!(status = %status, "InfluxDB accepted the write");
            return Ok(());
        }

        let cause = rejection_cause(&bytes, status);
        tracing::error!(status = %status, cause = %cause, "InfluxDB rejected the write");
        Err(WriteError::Rejected {
            status: status.as_u16(),
            cause,
        })
    }
}

/// The store reports failures as `{"error": "..."}`; fall back to the raw body,
/// then to the status line.
fn rejection_cause(body: &[u8], status: StatusCode) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice::<serde_json::Value>(body)
        && let Some(serde_json::Value::String(message)) = map.get("error")
    {
        return message.clone();
    }

    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.is_empty() {
        status.to_string()
    } else {
        text
    }
}

/// hyper-util wraps the interesting part (e.g. "Connection refused") in `source()`.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
