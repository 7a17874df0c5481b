//! Engine configuration
//!
//! One serde struct holds every startup knob. Missing fields fall back to
//! the defaults below, so a config file only needs the values it changes.

use crate::data::samples::DEFAULT_FEATURE_DIM;
use crate::data::vocab::DEFAULT_LABELS;
use crate::error::{GestureError, Result};
use crate::model::Architecture;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One classification-head naming convention to rewrite
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRename {
    pub from: String,
    pub to: String,
}

/// Checkpoint key reconciliation policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Structural prefixes removed from every checkpoint key
    pub strip_prefixes: Vec<String>,
    /// Head renames tried, in order, after the exact match fails
    pub head_renames: Vec<HeadRename>,
    /// Fall back to loading whatever matches when nothing else succeeds
    pub permissive: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            strip_prefixes: vec!["module.".to_string()],
            head_renames: vec![HeadRename {
                from: "fc.".to_string(),
                to: "classifier.".to_string(),
            }],
            permissive: true,
        }
    }
}

/// Everything needed to build a `GestureEngine`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Training-artifact root: one subdirectory per label
    pub data_root: PathBuf,
    /// Parameter checkpoint; `None` runs with random weights
    pub checkpoint: Option<PathBuf>,
    pub architecture: Architecture,
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub dropout: f32,
    /// Fixed temporal window every request is padded/truncated to
    pub target_frames: usize,
    /// Volume channels for the convolutional classifier
    pub in_channels: usize,
    pub default_labels: Vec<String>,
    pub default_feature_dim: usize,
    pub reconcile: ReconcileConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_root: PathBuf::from("processed/keypoints"),
            checkpoint: None,
            architecture: Architecture::Lstm,
            hidden_dim: 64,
            num_layers: 1,
            dropout: 0.3,
            target_frames: 8,
            in_channels: 3,
            default_labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            default_feature_dim: DEFAULT_FEATURE_DIM,
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a config from a JSON file; absent fields keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no model could be built from
    pub fn validate(&self) -> Result<()> {
        if self.target_frames == 0 {
            return Err(GestureError::Config("target_frames must be at least 1".into()));
        }
        if self.hidden_dim == 0 {
            return Err(GestureError::Config("hidden_dim must be at least 1".into()));
        }
        if self.num_layers == 0 {
            return Err(GestureError::Config("num_layers must be at least 1".into()));
        }
        if self.in_channels == 0 {
            return Err(GestureError::Config("in_channels must be at least 1".into()));
        }
        if self.default_feature_dim == 0 {
            return Err(GestureError::Config(
                "default_feature_dim must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(GestureError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.default_labels.is_empty() {
            return Err(GestureError::Config("default_labels must not be empty".into()));
        }
        Ok(())
    }
}
