//! Per-request inference
//!
//! # Components
//! - `normalize.rs`: Fixed-window padding/truncation of input sequences
//! - `predictor.rs`: Softmax, arg-max and the `Prediction` result
//! - `engine.rs`: `GestureEngine`, the load-once immutable classifier
//! - `capture.rs`: Saving raw request sequences for offline comparison

pub mod capture;
pub mod engine;
pub mod normalize;
pub mod predictor;

pub use capture::{CaptureSummary, SequenceCapture};
pub use engine::GestureEngine;
pub use normalize::{NormalizedSequence, RawSequence, SequenceNormalizer};
pub use predictor::{softmax, Prediction};
