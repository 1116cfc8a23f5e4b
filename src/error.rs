use std::path::PathBuf;
use thiserror::Error;

/// Core library errors
#[derive(Error, Debug)]
pub enum SweeperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error at path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("This tool must be run as root (effective uid {0})")]
    NotRoot(u32),

    #[error("Unsupported distribution '{id}' (supported: ubuntu, debian, almalinux, centos, rocky, rhel, fedora)")]
    UnsupportedDistro { id: String },

    #[error("Could not identify the distribution: no readable os-release or legacy release file")]
    UnknownDistro,

    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),
}

impl SweeperError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SweeperError::Io {
            path: path.into(),
            source,
        }
    }

    /// Fatal preconditions abort the run before anything is mutated.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SweeperError::NotRoot(_)
                | SweeperError::UnsupportedDistro { .. }
                | SweeperError::UnknownDistro
                | SweeperError::Config(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SweeperError>;
