//! Error types for cmodel

use std::path::PathBuf;
use thiserror::Error;

/// cmodel error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {path}: {reason}")]
    FileRead { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No C/C++ source files found under {0}")]
    NoInputFiles(String),

    #[error("Model invariant violated: {0}")]
    Invariant(String),
}

/// Result type alias for cmodel
pub type Result<T> = std::result::Result<T, Error>;
