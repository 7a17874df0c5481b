//! Model construction, checkpoint loading and reconciliation
//!
//! # Components
//! - `temporal.rs`: Bidirectional LSTM classifier over keypoint sequences
//! - `volumetric.rs`: 3-D convolutional classifier over image volumes
//! - `checkpoint.rs`: Checkpoint artifact readers (pickle, safetensors, bundle)
//! - `reconcile.rs`: Tiered key/shape reconciliation into a built model

pub mod checkpoint;
pub mod reconcile;
pub mod temporal;
pub mod volumetric;

use crate::error::{GestureError, Result};
use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::MutexGuard;
use temporal::TemporalClassifier;
use volumetric::VolumetricClassifier;

/// Topology discriminator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Bidirectional LSTM over (frames, features)
    Lstm,
    /// 3-D CNN over (channels, frames, H, W)
    Cnn3d,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Lstm => write!(f, "lstm"),
            Architecture::Cnn3d => write!(f, "cnn3d"),
        }
    }
}

/// Everything a topology is a function of
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub architecture: Architecture,
    /// Per-frame feature width (lstm) or volume channels (cnn3d)
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub num_classes: usize,
    pub dropout: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            architecture: Architecture::Lstm,
            input_dim: 126,
            hidden_dim: 64,
            num_layers: 1,
            num_classes: 5,
            dropout: 0.3,
        }
    }
}

/// The two fixed topologies behind one forward capability
pub enum Classifier {
    Temporal(TemporalClassifier),
    Volumetric(VolumetricClassifier),
}

impl Classifier {
    pub fn build(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let classifier = match config.architecture {
            Architecture::Lstm => Classifier::Temporal(TemporalClassifier::new(
                config.input_dim,
                config.hidden_dim,
                config.num_layers,
                config.num_classes,
                config.dropout,
                vb,
            )?),
            Architecture::Cnn3d => Classifier::Volumetric(VolumetricClassifier::new(
                config.input_dim,
                config.num_classes,
                vb,
            )?),
        };
        Ok(classifier)
    }

    /// Name of the classification head's weight parameter
    pub fn head_weight_name(&self) -> &'static str {
        match self {
            Classifier::Temporal(_) => "classifier.1.weight",
            Classifier::Volumetric(_) => "classifier.weight",
        }
    }
}

impl Module for Classifier {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Classifier::Temporal(m) => m.forward(xs),
            Classifier::Volumetric(m) => m.forward(xs),
        }
    }
}

/// A classifier together with the parameters it owns
pub struct Model {
    config: ModelConfig,
    device: Device,
    varmap: VarMap,
    classifier: Classifier,
}

impl Model {
    /// Build the selected topology with randomly initialized parameters
    pub fn new(config: ModelConfig, device: &Device) -> Result<Self> {
        if config.num_classes == 0 {
            return Err(GestureError::Config("model needs at least one class".into()));
        }
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let classifier = Classifier::build(&config, vb)?;
        Ok(Model {
            config,
            device: device.clone(),
            varmap,
            classifier,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Feature width a keypoint sequence must have, if the topology takes one
    pub fn expected_width(&self) -> Option<usize> {
        match self.config.architecture {
            Architecture::Lstm => Some(self.config.input_dim),
            Architecture::Cnn3d => None,
        }
    }

    /// Parameter name → shape, sorted by name
    pub fn parameter_shapes(&self) -> BTreeMap<String, Vec<usize>> {
        self.lock_vars()
            .iter()
            .map(|(name, var)| (name.clone(), var.dims().to_vec()))
            .collect()
    }

    /// Current value of a parameter
    pub fn parameter(&self, name: &str) -> Option<Tensor> {
        self.lock_vars().get(name).map(|var| var.as_tensor().clone())
    }

    /// Detached copy of every parameter, sorted by name
    pub fn state_dict(&self) -> Result<Vec<(String, Tensor)>> {
        let mut entries = Vec::new();
        for (name, var) in self.lock_vars().iter() {
            entries.push((name.clone(), var.as_tensor().copy()?));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    /// Overwrite a parameter in place; the shape must already match
    pub fn assign(&mut self, name: &str, value: &Tensor) -> Result<()> {
        let vars = self.lock_vars();
        let var = vars
            .get(name)
            .ok_or_else(|| GestureError::Checkpoint(format!("no parameter named '{}'", name)))?;
        if var.dims() != value.dims() {
            return Err(GestureError::Checkpoint(format!(
                "shape mismatch for '{}': model {:?}, checkpoint {:?}",
                name,
                var.dims(),
                value.dims()
            )));
        }
        let value = value.to_dtype(DType::F32)?.to_device(&self.device)?;
        var.set(&value)?;
        Ok(())
    }

    /// Number of scalar parameters
    pub fn parameter_count(&self) -> usize {
        self.lock_vars().values().map(|var| var.elem_count()).sum()
    }

    fn lock_vars(&self) -> MutexGuard<'_, HashMap<String, Var>> {
        self.varmap
            .data()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Module for Model {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.classifier.forward(xs)
    }
}
