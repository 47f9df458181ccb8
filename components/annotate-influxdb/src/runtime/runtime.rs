//! One invocation: resolve settings, then dispatch.

// Local crates
use crate::{
    client::client::Connect,
    dispatcher::dispatcher::{DispatchError, dispatch},
    helpers::load_config::{ConfigError, ConfigSources, FlagOverrides, Resolved, Settings},
};

// External crates
use tracing::instrument;

/// Failure of a whole invocation. Either layer's error is reported as is.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Settings could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The annotation was not written.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Resolve settings, then dispatch one annotation through `connector`.
///
/// Configuration errors are returned before the connector is touched.
#[instrument(
    name = "annotate_runtime::run_annotation",
    target = "runtime::runtime",
    skip_all,
    level = "debug"
)]
pub async fn run_annotation<C: Connect>(
    sources: &ConfigSources,
    flags: &FlagOverrides,
    connector: &C,
) -> Result<(), RunError> {
    let Resolved {
        settings,
        config_file,
    } = Settings::resolve(sources, flags)?;

    if let Some(path) = config_file {
        println!("Using config file: {}", path.display());
    }

    dispatch(settings, connector).await?;
    Ok(())
}
