//! Gesture sequence classifier
//!
//! Loads a keypoint-sequence classifier once (label discovery, feature
//! width inference, architecture selection, checkpoint reconciliation) and
//! serves predictions from it.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod inference;
pub mod model;

pub use config::EngineConfig;
pub use error::{GestureError, Result};
pub use inference::{GestureEngine, Prediction, RawSequence};
pub use model::reconcile::LoadStatus;
pub use model::Architecture;
