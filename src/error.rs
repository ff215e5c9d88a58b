//! Error types for plbert-rs.

use std::path::PathBuf;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error, including checkpoint decoding.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// I/O error (config read, directory listing).
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint archive error.
    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// YAML config parse error.
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid architecture configuration.
    #[error("config: {0}")]
    Config(String),

    /// No `step_<N>.t7` checkpoint in the log directory.
    #[error("no step_*.t7 checkpoint found in {}", dir.display())]
    NoCheckpoint { dir: PathBuf },

    /// Model weight loading error.
    #[error("weight loading: {0}")]
    WeightLoad(String),
}
