//! `annotate-influxdb` binary.

use anyhow::Result;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Tracing needs the parsed flags, so the CLI layer installs it before
    // resolving settings and dispatching.
    annotate_influxdb::cli::cli::run().await
}
