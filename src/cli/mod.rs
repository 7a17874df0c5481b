//! CLI Interface: terminal rendering for the binaries
//!
//! # Components
//! - `display.rs`: Prediction and load-status rendering

pub mod display;

pub use display::Display;
