//! Checkpoint reconciliation
//!
//! A checkpoint's parameter names drift: they may be nested under
//! `state_dict`, carry a parallel-training prefix, or use an older head
//! name. Keys are first normalized, then an ordered list of strategies is
//! tried until one succeeds. Renames persist into later strategies.

use crate::config::{HeadRename, ReconcileConfig};
use crate::error::Result;
use crate::model::checkpoint::{read_checkpoint, RawCheckpoint};
use crate::model::Model;
use candle_core::Tensor;
use log::{info, warn};
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::Path;

/// Normalized checkpoint: parameter name → tensor
pub type StateDict = FxHashMap<String, Tensor>;

/// One way of getting a checkpoint into a model
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Key set and every shape must equal the model's
    Exact,
    /// Rewrite one head naming convention into another, then match exactly
    RenameHead(HeadRename),
    /// Load whatever matches by name and shape, leave the rest random
    Permissive,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Exact => write!(f, "exact"),
            Strategy::RenameHead(r) => write!(f, "rename '{}' -> '{}'", r.from, r.to),
            Strategy::Permissive => write!(f, "permissive"),
        }
    }
}

/// A parameter present on both sides with different shapes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapeConflict {
    pub name: String,
    pub model: Vec<usize>,
    pub checkpoint: Vec<usize>,
}

/// What a successful strategy loaded
#[derive(Clone, Debug, Default)]
pub struct LoadReport {
    pub strategy: String,
    pub loaded: Vec<String>,
    /// Model parameters left at their random initialization
    pub missing: Vec<String>,
    /// Checkpoint keys with no model parameter
    pub unexpected: Vec<String>,
    pub mismatched: Vec<ShapeConflict>,
}

impl LoadReport {
    /// True when any model parameter kept its random initialization
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty() || !self.mismatched.is_empty()
    }
}

/// Outcome of startup checkpoint loading; never fatal
#[derive(Clone, Debug)]
pub enum LoadStatus {
    /// No usable checkpoint; every parameter is random
    RandomInit { reason: String },
    Loaded(LoadReport),
}

impl LoadStatus {
    /// Running with some or all parameters random
    pub fn is_degraded(&self) -> bool {
        match self {
            LoadStatus::RandomInit { .. } => true,
            LoadStatus::Loaded(report) => report.is_partial(),
        }
    }
}

/// Key comparison between a state dict and a model
struct KeyDiff {
    matched: Vec<String>,
    missing: Vec<String>,
    unexpected: Vec<String>,
    mismatched: Vec<ShapeConflict>,
}

impl KeyDiff {
    fn compute(state: &StateDict, model: &Model) -> Self {
        let shapes = model.parameter_shapes();
        let mut matched = Vec::new();
        let mut missing = Vec::new();
        let mut mismatched = Vec::new();

        for (name, model_shape) in &shapes {
            match state.get(name) {
                Some(tensor) if tensor.dims() == model_shape.as_slice() => matched.push(name.clone()),
                Some(tensor) => mismatched.push(ShapeConflict {
                    name: name.clone(),
                    model: model_shape.clone(),
                    checkpoint: tensor.dims().to_vec(),
                }),
                None => missing.push(name.clone()),
            }
        }

        let mut unexpected: Vec<String> = state
            .keys()
            .filter(|k| !shapes.contains_key(k.as_str()))
            .cloned()
            .collect();
        unexpected.sort();

        KeyDiff {
            matched,
            missing,
            unexpected,
            mismatched,
        }
    }

    fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }

    fn into_report(self, strategy: &Strategy) -> LoadReport {
        LoadReport {
            strategy: strategy.to_string(),
            loaded: self.matched,
            missing: self.missing,
            unexpected: self.unexpected,
            mismatched: self.mismatched,
        }
    }
}

/// Ordered strategy pipeline built from `ReconcileConfig`
#[derive(Clone, Debug)]
pub struct Reconciler {
    strip_prefixes: Vec<String>,
    strategies: Vec<Strategy>,
}

impl Reconciler {
    pub fn new(strip_prefixes: Vec<String>, strategies: Vec<Strategy>) -> Self {
        Reconciler {
            strip_prefixes,
            strategies,
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        let mut strategies = vec![Strategy::Exact];
        strategies.extend(config.head_renames.iter().cloned().map(Strategy::RenameHead));
        if config.permissive {
            strategies.push(Strategy::Permissive);
        }
        Reconciler::new(config.strip_prefixes.clone(), strategies)
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Load the checkpoint at `path` into `model`, degrading to random
    /// weights instead of failing
    pub fn load_into(&self, model: &mut Model, path: Option<&Path>) -> LoadStatus {
        let status = match path {
            None => LoadStatus::RandomInit {
                reason: "no checkpoint path configured".to_string(),
            },
            Some(path) if !path.exists() => LoadStatus::RandomInit {
                reason: format!("checkpoint not found at {}", path.display()),
            },
            Some(path) => match read_checkpoint(path, model.device()) {
                Ok(raw) => match self.reconcile(model, raw) {
                    Ok(Some(report)) => LoadStatus::Loaded(report),
                    Ok(None) => LoadStatus::RandomInit {
                        reason: format!("no strategy could load {}", path.display()),
                    },
                    Err(e) => LoadStatus::RandomInit {
                        reason: format!("failed to assign parameters from {}: {}", path.display(), e),
                    },
                },
                Err(e) => LoadStatus::RandomInit {
                    reason: format!("cannot read checkpoint {}: {}", path.display(), e),
                },
            },
        };

        match &status {
            LoadStatus::RandomInit { reason } => {
                warn!("{}; using random initialization", reason);
            }
            LoadStatus::Loaded(report) if report.is_partial() => {
                warn!(
                    "partial checkpoint load via {}: {} loaded, {} missing, {} shape conflicts",
                    report.strategy,
                    report.loaded.len(),
                    report.missing.len(),
                    report.mismatched.len()
                );
                for conflict in &report.mismatched {
                    warn!(
                        "  '{}': model {:?}, checkpoint {:?}",
                        conflict.name, conflict.model, conflict.checkpoint
                    );
                }
                if !report.missing.is_empty() {
                    warn!("  left random: {:?}", report.missing);
                }
            }
            LoadStatus::Loaded(report) => {
                info!(
                    "checkpoint loaded via {} ({} parameters)",
                    report.strategy,
                    report.loaded.len()
                );
            }
        }
        report_head(model);
        status
    }

    /// Unwrap, strip prefixes, then run strategies until one succeeds.
    /// `Ok(None)` means every strategy declined and nothing was assigned.
    pub fn reconcile(&self, model: &mut Model, raw: RawCheckpoint) -> Result<Option<LoadReport>> {
        let mut state = self.normalize(raw.into_state_dict());

        for strategy in &self.strategies {
            let diff = match strategy {
                Strategy::Exact => {
                    let diff = KeyDiff::compute(&state, model);
                    if !diff.is_exact() {
                        continue;
                    }
                    diff
                }
                Strategy::RenameHead(rename) => {
                    if !rename_applies(&state, model, rename) {
                        continue;
                    }
                    state = rename_keys(state, rename);
                    let diff = KeyDiff::compute(&state, model);
                    if !diff.is_exact() {
                        continue;
                    }
                    diff
                }
                Strategy::Permissive => KeyDiff::compute(&state, model),
            };

            for name in &diff.matched {
                if let Some(tensor) = state.get(name) {
                    model.assign(name, tensor)?;
                }
            }
            return Ok(Some(diff.into_report(strategy)));
        }
        Ok(None)
    }

    /// Strip configured prefixes; on collision the later entry wins
    fn normalize(&self, entries: Vec<(String, Tensor)>) -> StateDict {
        let mut state = StateDict::default();
        for (name, tensor) in entries {
            let key = self
                .strip_prefixes
                .iter()
                .find_map(|prefix| name.strip_prefix(prefix.as_str()))
                .unwrap_or(name.as_str())
                .to_string();
            state.insert(key, tensor);
        }
        state
    }
}

fn rename_applies(state: &StateDict, model: &Model, rename: &HeadRename) -> bool {
    state.keys().any(|k| k.starts_with(&rename.from))
        && model
            .parameter_shapes()
            .keys()
            .any(|k| k.starts_with(&rename.to))
}

fn rename_keys(state: StateDict, rename: &HeadRename) -> StateDict {
    state
        .into_iter()
        .map(|(name, tensor)| match name.strip_prefix(rename.from.as_str()) {
            Some(rest) => (format!("{}{}", rename.to, rest), tensor),
            None => (name, tensor),
        })
        .collect()
}

/// Log the head weight's norm so an operator can tell a loaded head from a
/// random one; falls back to listing a few parameter names
pub fn report_head(model: &Model) {
    let head = model.classifier().head_weight_name();
    let norm = model
        .parameter(head)
        .map(|w| -> candle_core::Result<(Vec<usize>, f32)> {
            let norm = w.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()?;
            Ok((w.dims().to_vec(), norm))
        });

    match norm {
        Some(Ok((shape, norm))) => {
            info!("head parameter '{}' shape={:?} norm={:.6}", head, shape, norm);
        }
        _ => {
            let first: Vec<String> = model.parameter_shapes().into_keys().take(6).collect();
            info!("model parameters: {:?}", first);
        }
    }
}

/// L2 norm of a parameter, for diagnostics and tests
pub fn parameter_norm(model: &Model, name: &str) -> Option<f32> {
    let w = model.parameter(name)?;
    w.sqr()
        .and_then(|s| s.sum_all())
        .and_then(|s| s.sqrt())
        .and_then(|s| s.to_scalar::<f32>())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::checkpoint::save_bundle;
    use crate::model::{Architecture, ModelConfig};
    use candle_core::{DType, Device};

    fn lstm_model() -> Model {
        Model::new(ModelConfig::default(), &Device::Cpu).unwrap()
    }

    fn values(model: &Model, name: &str) -> Vec<f32> {
        model
            .parameter(name)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
    }

    fn rename_all(entries: &[(String, Tensor)], from: &str, to: &str) -> Vec<(String, Tensor)> {
        entries
            .iter()
            .map(|(n, t)| match n.strip_prefix(from) {
                Some(rest) => (format!("{}{}", to, rest), t.clone()),
                None => (n.clone(), t.clone()),
            })
            .collect()
    }

    #[test]
    fn test_default_strategy_order() {
        let reconciler = Reconciler::from_config(&ReconcileConfig::default());
        assert_eq!(reconciler.strategies().len(), 3);
        assert_eq!(reconciler.strategies()[0], Strategy::Exact);
        assert_eq!(reconciler.strategies()[2], Strategy::Permissive);
    }

    #[test]
    fn test_exact_load() {
        let source = lstm_model();
        let mut target = lstm_model();
        let reconciler = Reconciler::from_config(&ReconcileConfig::default());

        let raw = RawCheckpoint::Flat(source.state_dict().unwrap());
        let report = reconciler.reconcile(&mut target, raw).unwrap().unwrap();
        assert_eq!(report.strategy, "exact");
        assert!(!report.is_partial());
        for (name, _) in source.state_dict().unwrap() {
            assert_eq!(values(&source, &name), values(&target, &name));
        }
    }

    #[test]
    fn test_unwrap_and_module_prefix() {
        let source = lstm_model();
        let mut target = lstm_model();
        let reconciler = Reconciler::from_config(&ReconcileConfig::default());

        let prefixed: Vec<(String, Tensor)> = source
            .state_dict()
            .unwrap()
            .into_iter()
            .map(|(n, t)| (format!("module.{}", n), t))
            .collect();
        let raw = RawCheckpoint::Wrapped {
            state_dict: prefixed,
        };
        let report = reconciler.reconcile(&mut target, raw).unwrap().unwrap();
        assert_eq!(report.strategy, "exact");
        assert_eq!(
            values(&source, "lstm.weight_hh_l0_reverse"),
            values(&target, "lstm.weight_hh_l0_reverse")
        );
    }

    #[test]
    fn test_fc_head_rename_matches_classifier_naming() {
        let source = lstm_model();
        let entries = source.state_dict().unwrap();
        let reconciler = Reconciler::from_config(&ReconcileConfig::default());

        let mut via_new_names = lstm_model();
        reconciler
            .reconcile(&mut via_new_names, RawCheckpoint::Flat(entries.clone()))
            .unwrap()
            .unwrap();

        let mut via_old_names = lstm_model();
        let old = rename_all(&entries, "classifier.", "fc.");
        assert!(old.iter().any(|(n, _)| n == "fc.1.weight"));
        let report = reconciler
            .reconcile(&mut via_old_names, RawCheckpoint::Flat(old))
            .unwrap()
            .unwrap();

        assert_eq!(report.strategy, "rename 'fc.' -> 'classifier.'");
        assert!(!report.is_partial());
        for name in ["classifier.1.weight", "classifier.1.bias"] {
            let a = values(&via_new_names, name);
            let b = values(&via_old_names, name);
            assert!(a.iter().zip(&b).all(|(x, y)| x.to_bits() == y.to_bits()));
        }
    }

    #[test]
    fn test_missing_head_loads_features_only() {
        let source = lstm_model();
        let mut target = lstm_model();
        let head_before = values(&target, "classifier.1.weight");
        let reconciler = Reconciler::from_config(&ReconcileConfig::default());

        let without_head: Vec<(String, Tensor)> = source
            .state_dict()
            .unwrap()
            .into_iter()
            .filter(|(n, _)| !n.starts_with("classifier."))
            .collect();
        let report = reconciler
            .reconcile(&mut target, RawCheckpoint::Flat(without_head))
            .unwrap()
            .unwrap();

        assert_eq!(report.strategy, "permissive");
        assert!(report.is_partial());
        assert_eq!(report.missing, vec!["classifier.1.bias", "classifier.1.weight"]);
        assert_eq!(values(&target, "classifier.1.weight"), head_before);
        assert_eq!(values(&source, "lstm.weight_ih_l0"), values(&target, "lstm.weight_ih_l0"));
    }

    #[test]
    fn test_shape_conflict_is_reported_not_fatal() {
        let source = Model::new(
            ModelConfig {
                num_classes: 7,
                ..ModelConfig::default()
            },
            &Device::Cpu,
        )
        .unwrap();
        let mut target = lstm_model();
        let reconciler = Reconciler::from_config(&ReconcileConfig::default());

        let report = reconciler
            .reconcile(&mut target, RawCheckpoint::Flat(source.state_dict().unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(report.strategy, "permissive");
        let conflicted: Vec<&str> = report.mismatched.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(conflicted, vec!["classifier.1.bias", "classifier.1.weight"]);
        assert_eq!(report.mismatched[1].checkpoint, vec![7, 128]);
        assert_eq!(values(&source, "lstm.bias_ih_l0"), values(&target, "lstm.bias_ih_l0"));
    }

    #[test]
    fn test_without_permissive_nothing_is_assigned() {
        let mut target = lstm_model();
        let before = values(&target, "lstm.weight_ih_l0");
        let reconciler = Reconciler::new(vec![], vec![Strategy::Exact]);

        let partial = vec![(
            "lstm.weight_ih_l0".to_string(),
            Tensor::zeros((256, 126), DType::F32, &Device::Cpu).unwrap(),
        )];
        let outcome = reconciler
            .reconcile(&mut target, RawCheckpoint::Flat(partial))
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(values(&target, "lstm.weight_ih_l0"), before);
    }

    #[test]
    fn test_missing_path_is_degraded() {
        let mut model = lstm_model();
        let reconciler = Reconciler::from_config(&ReconcileConfig::default());

        let status = reconciler.load_into(&mut model, None);
        assert!(matches!(status, LoadStatus::RandomInit { .. }));
        assert!(status.is_degraded());

        let dir = tempfile::tempdir().unwrap();
        let status = reconciler.load_into(&mut model, Some(&dir.path().join("absent.pth")));
        assert!(matches!(status, LoadStatus::RandomInit { .. }));
    }

    #[test]
    fn test_corrupt_file_is_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bin");
        std::fs::write(&path, b"not a bundle").unwrap();

        let mut model = lstm_model();
        let reconciler = Reconciler::from_config(&ReconcileConfig::default());
        assert!(reconciler.load_into(&mut model, Some(&path)).is_degraded());
    }

    #[test]
    fn test_load_into_from_bundle_file() {
        let config = ModelConfig {
            architecture: Architecture::Cnn3d,
            input_dim: 3,
            ..ModelConfig::default()
        };
        let source = Model::new(config.clone(), &Device::Cpu).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cnn.bin");
        let old = rename_all(&source.state_dict().unwrap(), "classifier.", "fc.");
        save_bundle(&path, &old, Some(&config)).unwrap();

        let mut target = Model::new(config, &Device::Cpu).unwrap();
        let status = Reconciler::from_config(&ReconcileConfig::default())
            .load_into(&mut target, Some(&path));
        assert!(!status.is_degraded());
        assert_eq!(
            parameter_norm(&source, "classifier.weight"),
            parameter_norm(&target, "classifier.weight")
        );
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    fn small_lstm() -> Model {
        let config = ModelConfig {
            input_dim: 2,
            hidden_dim: 2,
            num_layers: 1,
            num_classes: 3,
            ..ModelConfig::default()
        };
        Model::new(config, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_load_into_flat_pth_renames_fc_head() {
        let mut model = small_lstm();
        let status = Reconciler::from_config(&ReconcileConfig::default())
            .load_into(&mut model, Some(&fixture("lstm_flat.pth")));

        match &status {
            LoadStatus::Loaded(report) => {
                assert_eq!(report.strategy, "rename 'fc.' -> 'classifier.'");
                assert!(!report.is_partial());
                assert_eq!(report.loaded.len(), 10);
            }
            other => panic!("expected a load, got {:?}", other),
        }
        assert_eq!(values(&model, "classifier.1.bias"), vec![1.0, 2.0, 3.0]);
        assert_eq!(values(&model, "lstm.bias_hh_l0_reverse").len(), 8);
    }

    #[test]
    fn test_load_into_wrapped_pth_is_partial() {
        let mut model = small_lstm();
        let status = Reconciler::from_config(&ReconcileConfig::default())
            .load_into(&mut model, Some(&fixture("head_wrapped.pth")));

        let LoadStatus::Loaded(report) = &status else {
            panic!("expected a load, got {:?}", status);
        };
        assert_eq!(report.strategy, "permissive");
        assert_eq!(report.missing.len(), 8);
        assert!(status.is_degraded());
        assert_eq!(values(&model, "classifier.1.bias"), vec![1.0, 2.0, 3.0]);
    }
}
