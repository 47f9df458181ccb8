//! Points, write batches and their line protocol encoding.
//!
//! A [`Point`] is one timestamped record: a measurement name, an indexed tagset
//! and a fieldset of string values. Points are collected into a [`BatchPoints`]
//! scoped to a single database, which renders the request body for the InfluxDB
//! `/write` endpoint.
//!
//! Encoding rules follow the InfluxDB line protocol:
//! - measurement names escape `,` and spaces,
//! - tag keys, tag values and field keys escape `,`, `=` and spaces,
//! - string field values are double quoted with `\` and `"` escaped,
//! - tags and fields are written in key order.

// External crates
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::{self, Write};

/// Time precision of a write batch, sent as the `precision` query parameter.
/// Annotations only ever carry whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// `s`
    Seconds,
}

impl Precision {
    /// Query parameter value understood by the `/write` endpoint.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Seconds => "s",
        }
    }

    /// Express `timestamp` as an integer count of this precision's unit since the epoch.
    fn encode(self, timestamp: &DateTime<Utc>) -> i64 {
        match self {
            Precision::Seconds => timestamp.timestamp(),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point construction errors.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PointError {
    /// Empty measurement name.
    #[error("point is missing a measurement name")]
    MissingMeasurement,
    /// The line protocol requires at least one field.
    #[error("point without fields is unsupported")]
    NoFields,
}

/// Batch construction errors.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BatchError {
    /// Control characters cannot travel in the `db` query parameter.
    #[error("database name {0:?} contains control characters")]
    InvalidDatabase(String),
}

/// One timestamped record. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
}

impl Point {
    /// Build a point, rejecting anything the line protocol cannot carry.
    pub fn new(
        measurement: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, PointError> {
        let measurement = measurement.into();
        if measurement.is_empty() {
            return Err(PointError::MissingMeasurement);
        }
        if fields.is_empty() {
            return Err(PointError::NoFields);
        }

        Ok(Self {
            measurement,
            tags,
            fields,
            timestamp,
        })
    }

    /// Measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Indexed tags, in key order.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Field set, in key order.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// UTC timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Render this point as one line protocol line (no trailing newline).
    #[must_use]
    pub fn to_line(&self, precision: Precision) -> String {
        let mut line = String::new();
        escape_into(&mut line, &self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            if key.is_empty() || value.is_empty() {
                continue;
            }
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }

        let mut separator = ' ';
        for (key, value) in &self.fields {
            line.push(separator);
            separator = ',';
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            line.push('"');
            escape_into(&mut line, value, &['\\', '"']);
            line.push('"');
        }

        let _ = write!(line, " {}", precision.encode(&self.timestamp));
        line
    }
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Points destined for one database, written in a single request.
#[derive(Debug, Clone)]
pub struct BatchPoints {
    database: String,
    precision: Precision,
    points: Vec<Point>,
}

impl BatchPoints {
    /// Create an empty batch.
    ///
    /// An empty database name is accepted; the store decides whether it is valid.
    pub fn new(database: impl Into<String>, precision: Precision) -> Result<Self, BatchError> {
        let database = database.into();
        if database.chars().any(char::is_control) {
            return Err(BatchError::InvalidDatabase(database));
        }
        Ok(Self {
            database,
            precision,
            points: Vec::new(),
        })
    }

    /// Append `point`. Never fails.
    pub fn add_point(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Destination database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Timestamp precision of every line.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Points in insertion order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Request body: one line per point, newline separated.
    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        self.points
            .iter()
            .map(|p| p.to_line(self.precision))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
