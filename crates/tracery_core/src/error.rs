//! # Core Error Types
//!
//! Errors raised while validating configs and loading pipeline settings.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the GPU-free layer.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A config struct is missing a required reference or holds an impossible value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The config file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for `PipelineConfig`.
    #[error("failed to parse pipeline config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
