use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::browser::BrowserError;
use crate::login::{InterstitialError, LoginError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("selector '{0}' not found in selectors config")]
    MissingSelector(String),
    #[error("selector '{key}' is empty")]
    InvalidSelector { key: String },
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors surfaced to callers of [`crate::InstaClient`].
#[derive(Debug, Error)]
pub enum InstatError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Login(#[from] LoginError),
    #[error(transparent)]
    Interstitial(#[from] InterstitialError),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

pub type InstatResult<T> = std::result::Result<T, InstatError>;
