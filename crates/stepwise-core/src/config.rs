//! Engine configuration loader.
//!
//! Reads `stepwise.toml` and deserializes it into [`EngineConfig`]. Falls
//! back to defaults when the file is missing or malformed.

use std::path::Path;

use stepwise_types::config::EngineConfig;

/// Default file name looked up by the CLI.
pub const CONFIG_FILE: &str = "stepwise.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parse engine configuration from TOML text.
pub fn parse_engine_config(content: &str) -> Result<EngineConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load engine configuration from `path`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or malformed file: logs a warning and returns the default.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match parse_engine_config(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}
