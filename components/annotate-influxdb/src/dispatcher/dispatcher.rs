//! Annotation Dispatcher - responsibility and behavior
//!
//! Turns resolved [`Settings`] into exactly one [`Point`] and writes it once.
//! The steps run strictly in order and the first failure ends the run:
//!
//! ```text
//! Start -> Connected -> BatchBuilt -> PointBuilt -> Attached -> Submitted -> Done
//!    \__________\____________\____________\______________________\_______-> Failed
//! ```
//!
//! Important design notes:
//! - Nothing is retried. At most one point is written and the store applies it
//!   atomically, so there is no partial state to roll back.
//! - All descriptive data rides in fields; the tagset stays empty unless
//!   `promote_tags` is set, matching what existing dashboards query.

// Local crates
use crate::{
    client::client::{Connect, Endpoint, EndpointError, WriteClient, WriteError},
    helpers::load_config::Settings,
    point::point::{BatchError, BatchPoints, Point, PointError, Precision},
};

// External crates
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::BTreeMap;
use tracing::instrument;

/// Annotations are written with whole-second timestamps.
pub const ANNOTATION_PRECISION: Precision = Precision::Seconds;

/// Every way a dispatch can fail. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The endpoint URL is unusable (`ConnectionError`).
    #[error("cannot connect to the configured endpoint")]
    Connection(#[source] EndpointError),
    /// The batch cannot carry the database name (`BatchConfigError`).
    #[error("invalid write batch configuration")]
    BatchConfig(#[from] BatchError),
    /// The point is invalid (`PointConstructionError`).
    #[error("cannot build the annotation point")]
    PointConstruction(#[from] PointError),
    /// The write was not accepted (`WriteError`).
    #[error("annotation write failed")]
    Write(#[from] WriteError),
}

/// Build the annotation point for `settings` at `timestamp`.
///
/// Fields are always `description`, `tags` (labels joined with `,` in the order
/// given) and `title`.
pub fn annotation_point(settings: &Settings, timestamp: DateTime<Utc>) -> Result<Point, PointError> {
    let mut fields = BTreeMap::new();
    fields.insert("description".to_string(), settings.description.clone());
    fields.insert("tags".to_string(), settings.tags.join(","));
    fields.insert("title".to_string(), settings.title.clone());

    let tags = if settings.promote_tags {
        promoted_tags(&settings.tags)
    } else {
        BTreeMap::new()
    };

    Point::new(settings.measurement.as_str(), tags, fields, timestamp)
}

/// `key=value` labels become indexed tags; bare labels stay field-only.
fn promoted_tags(labels: &[String]) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter_map(|label| label.split_once('='))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Write one annotation described by `settings` through `connector`.
#[instrument(
    name = "annotation_dispatcher::dispatch",
    target = "dispatcher::dispatcher",
    skip_all,
    level = "debug"
)]
pub async fn dispatch<C: Connect>(settings: Settings, connector: &C) -> Result<(), DispatchError> {
    let endpoint = Endpoint::parse(&settings.endpoint).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse InfluxDB endpoint URL");
        DispatchError::Connection(e)
    })?;
    tracing::debug!(endpoint = %endpoint.display_url(), "Connecting to InfluxDB endpoint");
    let client = connector.connect(endpoint);

    let mut batch = BatchPoints::new(settings.database.as_str(), ANNOTATION_PRECISION)?;
    tracing::debug!(
        database = %batch.database(),
        precision = %batch.precision(),
        "Write batch created"
    );

    let point = annotation_point(&settings, Utc::now().trunc_subsecs(0))?;
    tracing::debug!(
        measurement = %point.measurement(),
        indexed_tags = point.tags().len(),
        fields = point.fields().len(),
        timestamp = %point.timestamp(),
        "Annotation point built"
    );
    batch.add_point(point);

    client.write(&batch).await.inspect_err(|e| {
        tracing::error!(error = %e, "Annotation write failed");
    })?;
    tracing::info!(
        database = %settings.database,
        measurement = %settings.measurement,
        "Annotation written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::recording::RecordingConnector;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn deploy_settings() -> Settings {
        Settings {
            endpoint: "http://localhost:8086".into(),
            database: "metrics".into(),
            title: "deploy v2".into(),
            description: "rolled out".into(),
            tags: vec!["release".into(), "prod".into()],
            ..Settings::default()
        }
    }

    #[test]
    fn point_carries_three_string_fields_and_no_tags() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let point = annotation_point(&deploy_settings(), ts).unwrap();

        assert_eq!(point.measurement(), "events");
        assert!(point.tags().is_empty());
        assert_eq!(
            point.fields().clone(),
            BTreeMap::from([
                ("description".to_string(), "rolled out".to_string()),
                ("tags".to_string(), "release,prod".to_string()),
                ("title".to_string(), "deploy v2".to_string()),
            ])
        );
        assert_eq!(point.timestamp(), ts);
    }

    #[test]
    fn tags_field_is_ordered_join_or_empty() {
        let ts = Utc::now();
        let mut settings = Settings {
            tags: vec!["z".into(), "a".into(), "m".into()],
            ..Settings::default()
        };
        let point = annotation_point(&settings, ts).unwrap();
        assert_eq!(point.fields()["tags"], "z,a,m");

        settings.tags.clear();
        let point = annotation_point(&settings, ts).unwrap();
        assert_eq!(point.fields()["tags"], "");
    }

    #[test]
    fn promote_tags_indexes_key_value_labels_only() {
        let settings = Settings {
            tags: vec!["env=prod".into(), "release".into(), "=x".into(), "team=".into()],
            promote_tags: true,
            ..Settings::default()
        };
        let point = annotation_point(&settings, Utc::now()).unwrap();

        assert_eq!(
            point.tags().clone(),
            BTreeMap::from([("env".to_string(), "prod".to_string())])
        );
        assert_eq!(point.fields()["tags"], "env=prod,release,=x,team=");
    }

    #[tokio::test]
    async fn dispatch_writes_one_fresh_point_to_the_configured_database() {
        let connector = RecordingConnector::default();
        let before = Utc::now();
        dispatch(deploy_settings(), &connector).await.unwrap();
        let after = Utc::now();

        assert_eq!(connector.connect_count(), 1);
        let batches = connector.written();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.database(), "metrics");
        assert_eq!(batch.precision(), Precision::Seconds);
        assert_eq!(batch.points().len(), 1);

        let ts = batch.points()[0].timestamp();
        assert_eq!(ts.timestamp_subsec_nanos(), 0);
        assert!(ts >= before.trunc_subsecs(0));
        assert!(after - ts <= chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn malformed_endpoint_fails_before_connecting() {
        let connector = RecordingConnector::default();
        let settings = Settings {
            endpoint: "not a url".into(),
            ..deploy_settings()
        };
        let err = dispatch(settings, &connector).await.unwrap_err();

        assert!(matches!(err, DispatchError::Connection(_)));
        assert_eq!(connector.connect_count(), 0);
        assert!(connector.written().is_empty());
    }

    #[tokio::test]
    async fn invalid_database_or_point_never_reaches_the_store() {
        let connector = RecordingConnector::default();
        let bad_db = Settings {
            database: "metrics\u{0}".into(),
            ..deploy_settings()
        };
        let err = dispatch(bad_db, &connector).await.unwrap_err();
        assert!(matches!(err, DispatchError::BatchConfig(_)));

        let no_measurement = Settings {
            measurement: String::new(),
            ..deploy_settings()
        };
        let err = dispatch(no_measurement, &connector).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::PointConstruction(PointError::MissingMeasurement)
        ));

        assert!(connector.written().is_empty());
    }

    #[tokio::test]
    async fn store_rejection_is_surfaced_verbatim() {
        let connector = RecordingConnector::rejecting("database not found: \"metrics\"");
        let err = dispatch(deploy_settings(), &connector).await.unwrap_err();

        assert!(matches!(err, DispatchError::Write(_)));
        let cause = std::error::Error::source(&err).unwrap().to_string();
        assert!(cause.contains("database not found: \"metrics\""));
        assert_eq!(connector.written().len(), 1);
    }
}
