//! HTTP client for the InfluxDB write API.
pub mod client;

#[cfg(test)]
pub(crate) mod recording;
