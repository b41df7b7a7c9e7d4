use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAGNIFICATION: f32 = 1.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed for the lifetime of a displayed document.
    pub magnification: f32,
    pub pdfium_library_path: Option<PathBuf>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins.
    pub filter: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("magnification must be a positive finite number, got {0}")]
    InvalidMagnification(f32),
    #[error("log file name must not be empty")]
    EmptyLogFileName,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            magnification: DEFAULT_MAGNIFICATION,
            pdfium_library_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file_name: "pageoverlay.log".to_string(),
        }
    }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("net", "pageoverlay", "pageoverlay")
}

impl EngineConfig {
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {:?}", path))?;
        Self::from_toml(&source).with_context(|| format!("in configuration file {:?}", path))
    }

    /// An explicit path must exist; the default location may be absent.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.magnification.is_finite() && self.magnification > 0.0) {
            return Err(ConfigError::InvalidMagnification(self.magnification));
        }
        if self.logging.file_name.trim().is_empty() {
            return Err(ConfigError::EmptyLogFileName);
        }
        Ok(())
    }
}
