//! Training-artifact discovery
//!
//! # Components
//! - `vocab.rs`: Label vocabulary discovered from the dataset layout
//! - `samples.rs`: Sample lookup and per-frame feature width inference

pub mod samples;
pub mod vocab;

pub use samples::{first_sample, infer_feature_dim, load_sample};
pub use vocab::{Vocab, VocabSource};
