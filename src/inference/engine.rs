//! Load-once, serve-many classification engine
//!
//! `GestureEngine::load` runs discovery, architecture selection and
//! checkpoint reconciliation once. The engine is immutable afterwards and
//! can be shared by reference (or `Arc`) across request threads.

use crate::config::EngineConfig;
use crate::data::{infer_feature_dim, Vocab};
use crate::error::{GestureError, Result};
use crate::inference::normalize::{NormalizedSequence, RawSequence, SequenceNormalizer};
use crate::inference::predictor::{classify, Prediction};
use crate::model::reconcile::{LoadStatus, Reconciler};
use crate::model::{Architecture, Model, ModelConfig};
use candle_core::{Device, Module, Tensor};
use log::{debug, info};

pub struct GestureEngine {
    vocab: Vocab,
    model: Model,
    normalizer: SequenceNormalizer,
    load_status: LoadStatus,
}

impl GestureEngine {
    /// Build the engine from configuration. Checkpoint problems degrade to
    /// random weights; only invalid configuration fails.
    pub fn load(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let device = Device::Cpu;

        let fallback = Vocab::from_labels(config.default_labels.iter().cloned())?;
        let vocab = Vocab::discover(&config.data_root, fallback);

        let input_dim = match config.architecture {
            Architecture::Lstm => {
                infer_feature_dim(&config.data_root, &vocab, config.default_feature_dim)
            }
            Architecture::Cnn3d => config.in_channels,
        };

        let model_config = ModelConfig {
            architecture: config.architecture,
            input_dim,
            hidden_dim: config.hidden_dim,
            num_layers: config.num_layers,
            num_classes: vocab.size(),
            dropout: config.dropout,
        };
        info!(
            "building {} classifier: input {}, hidden {}, layers {}, {} classes",
            model_config.architecture,
            model_config.input_dim,
            model_config.hidden_dim,
            model_config.num_layers,
            model_config.num_classes
        );
        let mut model = Model::new(model_config, &device)?;

        let reconciler = Reconciler::from_config(&config.reconcile);
        let load_status = reconciler.load_into(&mut model, config.checkpoint.as_deref());

        Ok(Self::from_parts(
            vocab,
            model,
            SequenceNormalizer::new(config.target_frames)?,
            load_status,
        ))
    }

    /// Assemble an engine from already-built components
    pub fn from_parts(
        vocab: Vocab,
        model: Model,
        normalizer: SequenceNormalizer,
        load_status: LoadStatus,
    ) -> Self {
        GestureEngine {
            vocab,
            model,
            normalizer,
            load_status,
        }
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn normalizer(&self) -> &SequenceNormalizer {
        &self.normalizer
    }

    pub fn load_status(&self) -> &LoadStatus {
        &self.load_status
    }

    /// Classify one keypoint sequence
    pub fn predict(&self, sequence: &[Vec<f32>]) -> Result<Prediction> {
        let normalized = self.normalizer.normalize(sequence)?;
        debug!(
            "normalized {} frames to ({}, {})",
            normalized.source_frames(),
            normalized.frames(),
            normalized.width()
        );
        self.predict_normalized(&normalized)
    }

    /// Classify a request payload (frames or a single flat frame)
    pub fn predict_raw(&self, raw: RawSequence) -> Result<Prediction> {
        self.predict(&raw.into_frames())
    }

    pub fn predict_normalized(&self, normalized: &NormalizedSequence) -> Result<Prediction> {
        let batch = normalized.to_batch(self.model.device())?;
        let logits = self.model.forward(&batch).map_err(|e| {
            match self.model.expected_width() {
                Some(expected) if expected != normalized.width() => GestureError::ShapeMismatch {
                    expected,
                    actual: normalized.width(),
                },
                _ => GestureError::Tensor(e),
            }
        })?;
        self.classify_batch_of_one(&logits)
    }

    /// Classify a pre-built `(1, channels, frames, H, W)` volume
    pub fn predict_volume(&self, volume: &Tensor) -> Result<Prediction> {
        let logits = self.model.forward(volume)?;
        self.classify_batch_of_one(&logits)
    }

    fn classify_batch_of_one(&self, logits: &Tensor) -> Result<Prediction> {
        let rows = logits.to_vec2::<f32>()?;
        let row = rows
            .first()
            .ok_or_else(|| GestureError::InvalidSequence("model returned no scores".into()))?;
        classify(row, &self.vocab)
    }
}
