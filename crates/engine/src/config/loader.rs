use std::path::{Path, PathBuf};

use theodore_common::config::SystemConfig;

use super::validation;

/// Complete engine configuration loaded from theodore.toml.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub system: SystemConfig,
    /// Path the config was loaded from (for reload and diagnostics).
    #[allow(dead_code)]
    pub config_path: PathBuf,
}

/// Load and validate configuration.
///
/// Fails loudly with clear error messages if anything is misconfigured;
/// the engine refuses to start on validation failure.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    tracing::info!(config_path = %path.display(), "Loading configuration");

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let system: SystemConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    validation::validate(&system)?;

    tracing::info!(
        provider = %system.llm.provider,
        workers = system.pool.workers,
        "Configuration loaded successfully"
    );

    Ok(EngineConfig {
        system,
        config_path: path.to_path_buf(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}
