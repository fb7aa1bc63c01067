use std::env;
use std::io;

use tracing_subscriber::EnvFilter;

use crate::config::{DeployerConfig, LogFormat};
use crate::error::{DeployerError, Result};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "CLOUD_DEPLOYER_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global stderr subscriber. Calling it twice is an error.
pub fn init(config: &DeployerConfig) -> Result<()> {
    let filter = env_filter(env::var(LOG_ENV).ok().as_deref())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);

    let installed = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| DeployerError::Telemetry(err.to_string()))
}

fn env_filter(directives: Option<&str>) -> Result<EnvFilter> {
    let directives = directives
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVE);
    EnvFilter::try_new(directives).map_err(|err| {
        DeployerError::Telemetry(format!("invalid {LOG_ENV} value '{directives}': {err}"))
    })
}
