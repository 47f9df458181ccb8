//! Record one annotation event (title, description, tags) in InfluxDB so
//! dashboards can overlay it on metric graphs.
//!
//! Settings are resolved from flags, a config file, the environment and
//! defaults ([`helpers::load_config`]), turned into a single line-protocol point
//! ([`dispatcher::dispatcher`]) and posted to the store's `/write` endpoint
//! ([`client::client`]).

pub mod cli;
pub mod client;
pub mod dispatcher;
pub mod helpers;
pub mod instrumentation;
pub mod point;
pub mod runtime;
