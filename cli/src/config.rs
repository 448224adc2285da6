//! `~/.tron/config.toml` loading.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tron_lsp::LspConfig;

#[derive(Debug, Default, Deserialize)]
pub struct TronConfig {
    /// Language server configuration.
    pub lsp: Option<LspConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tron").join("config.toml"))
}

impl TronConfig {
    /// Load the user config. `Ok(None)` when there is no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map(Some).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}
