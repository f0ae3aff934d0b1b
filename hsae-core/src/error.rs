//! Error types for the hsae-core crate.

use thiserror::Error;

/// Top-level error type for network construction, training and inference.
#[derive(Debug, Error)]
pub enum AeError {
    /// Invalid or missing configuration, raised while a network is built.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A model name that was never registered.
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Two tensors that must agree in shape do not.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Misuse of the computation graph (unfed placeholder, unknown node, ...).
    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Array error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}

impl From<figment::Error> for AeError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AeError>;
