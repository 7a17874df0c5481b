//! Error type shared by the whole pipeline
//!
//! Startup degradations (missing checkpoint, partial loads) are not errors:
//! they are reported through `LoadStatus`. Everything here is fatal to the
//! call that produced it.

use thiserror::Error;

/// Errors raised by engine construction and per-request inference
#[derive(Error, Debug)]
pub enum GestureError {
    /// Empty, ragged or non-numeric input sequence
    #[error("invalid sequence input: {0}")]
    InvalidSequence(String),

    /// Input frame width disagrees with the width the model was built for
    #[error("feature width mismatch: model expects {expected}, input has {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("vocabulary error: {0}")]
    Vocab(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bundle serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GestureError>;
