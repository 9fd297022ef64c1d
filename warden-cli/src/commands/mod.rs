//! Command handlers -- one module per subcommand

pub mod config;
pub mod replay;
pub mod rules;

use std::path::Path;

use tracing::info;

use warden_core::config::WardenConfig;

use crate::error::CliError;

/// Load the configuration file, falling back to defaults when it does not exist.
///
/// Environment overrides apply in both cases.
pub async fn load_config_or_default(path: &Path) -> Result<WardenConfig, CliError> {
    if tokio::fs::try_exists(path).await? {
        return Ok(WardenConfig::load(path).await?);
    }

    info!(path = %path.display(), "config file not found, using defaults");
    let mut config = WardenConfig::default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
