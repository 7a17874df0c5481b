//! Checkpoint artifact readers
//!
//! Three on-disk formats, picked by extension:
//! - `.pth` / `.pt` / `.ckpt`: PyTorch pickle, flat or under `state_dict`
//! - `.safetensors`: flat; keys under `state_dict.` form the nested mapping
//! - `.bin`: bincode `CheckpointBundle` of named f32 records

use crate::error::{GestureError, Result};
use crate::model::ModelConfig;
use candle_core::{DType, Device, Tensor};
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const STATE_DICT_KEY: &str = "state_dict";

/// One named tensor, flattened for bincode
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TensorRecord {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    pub fn from_tensor(name: &str, tensor: &Tensor) -> Result<Self> {
        Ok(TensorRecord {
            name: name.to_string(),
            shape: tensor.dims().to_vec(),
            data: tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?,
        })
    }

    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(GestureError::Checkpoint(format!(
                "record '{}' has {} values for shape {:?}",
                self.name,
                self.data.len(),
                self.shape
            )));
        }
        Ok(Tensor::from_slice(&self.data, self.shape.as_slice(), device)?)
    }
}

/// Serialized bundle layout
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum CheckpointBundle {
    Flat(Vec<TensorRecord>),
    Wrapped {
        state_dict: Vec<TensorRecord>,
        config: Option<ModelConfig>,
    },
}

/// A checkpoint as read from disk, before any key normalization
#[derive(Debug)]
pub enum RawCheckpoint {
    Flat(Vec<(String, Tensor)>),
    Wrapped { state_dict: Vec<(String, Tensor)> },
}

impl RawCheckpoint {
    /// Every entry of the parameter mapping, nested or not
    pub fn entries(&self) -> &[(String, Tensor)] {
        match self {
            RawCheckpoint::Flat(entries) => entries,
            RawCheckpoint::Wrapped { state_dict } => state_dict,
        }
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(self, RawCheckpoint::Wrapped { .. })
    }

    /// The parameter mapping, unwrapped from `state_dict` if nested
    pub fn into_state_dict(self) -> Vec<(String, Tensor)> {
        match self {
            RawCheckpoint::Flat(entries) => entries,
            RawCheckpoint::Wrapped { state_dict } => state_dict,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointFormat {
    Pickle,
    SafeTensors,
    Bundle,
}

impl CheckpointFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pth") | Some("pt") | Some("ckpt") => Ok(CheckpointFormat::Pickle),
            Some("safetensors") => Ok(CheckpointFormat::SafeTensors),
            Some("bin") => Ok(CheckpointFormat::Bundle),
            _ => Err(GestureError::Checkpoint(format!(
                "unrecognized checkpoint extension: {}",
                path.display()
            ))),
        }
    }
}

/// Read a checkpoint artifact onto `device`
pub fn read_checkpoint(path: &Path, device: &Device) -> Result<RawCheckpoint> {
    let raw = match CheckpointFormat::from_path(path)? {
        CheckpointFormat::Pickle => read_pickle(path)?,
        CheckpointFormat::SafeTensors => read_safetensors(path, device)?,
        CheckpointFormat::Bundle => read_bundle(path, device)?,
    };
    debug!(
        "read {} tensors from {} (wrapped: {})",
        raw.entries().len(),
        path.display(),
        raw.is_wrapped()
    );
    Ok(raw)
}

fn read_pickle(path: &Path) -> Result<RawCheckpoint> {
    match candle_core::pickle::read_all_with_key(path, Some(STATE_DICT_KEY)) {
        Ok(nested) if !nested.is_empty() => Ok(RawCheckpoint::Wrapped { state_dict: nested }),
        _ => Ok(RawCheckpoint::Flat(candle_core::pickle::read_all(path)?)),
    }
}

fn read_safetensors(path: &Path, device: &Device) -> Result<RawCheckpoint> {
    let mut entries: Vec<(String, Tensor)> = candle_core::safetensors::load(path, device)?
        .into_iter()
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let nested_prefix = format!("{}.", STATE_DICT_KEY);
    if !entries.iter().any(|(name, _)| name.starts_with(&nested_prefix)) {
        return Ok(RawCheckpoint::Flat(entries));
    }

    let mut state_dict = Vec::new();
    for (name, tensor) in entries {
        match name.strip_prefix(&nested_prefix) {
            Some(inner) => state_dict.push((inner.to_string(), tensor)),
            None => debug!("ignoring non-parameter entry '{}'", name),
        }
    }
    Ok(RawCheckpoint::Wrapped { state_dict })
}

fn read_bundle(path: &Path, device: &Device) -> Result<RawCheckpoint> {
    let bytes = fs::read(path)?;
    let bundle: CheckpointBundle = bincode::deserialize(&bytes)?;

    let to_tensors = |records: Vec<TensorRecord>| -> Result<Vec<(String, Tensor)>> {
        records
            .into_iter()
            .map(|r| Ok((r.name.clone(), r.to_tensor(device)?)))
            .collect()
    };

    match bundle {
        CheckpointBundle::Flat(records) => Ok(RawCheckpoint::Flat(to_tensors(records)?)),
        CheckpointBundle::Wrapped { state_dict, config } => {
            if let Some(config) = config {
                debug!("bundle was saved for {:?}", config);
            }
            Ok(RawCheckpoint::Wrapped {
                state_dict: to_tensors(state_dict)?,
            })
        }
    }
}

/// Write named tensors as a bincode bundle; `config` selects the wrapped layout
pub fn save_bundle(
    path: &Path,
    entries: &[(String, Tensor)],
    config: Option<&ModelConfig>,
) -> Result<()> {
    let records = entries
        .iter()
        .map(|(name, tensor)| TensorRecord::from_tensor(name, tensor))
        .collect::<Result<Vec<_>>>()?;

    let bundle = match config {
        Some(config) => CheckpointBundle::Wrapped {
            state_dict: records,
            config: Some(config.clone()),
        },
        None => CheckpointBundle::Flat(records),
    };

    fs::write(path, bincode::serialize(&bundle)?)?;
    Ok(())
}

/// Write named tensors as safetensors, optionally nested under `state_dict.`
pub fn save_safetensors(path: &Path, entries: &[(String, Tensor)], wrapped: bool) -> Result<()> {
    let tensors: HashMap<String, Tensor> = entries
        .iter()
        .map(|(name, tensor)| {
            let key = if wrapped {
                format!("{}.{}", STATE_DICT_KEY, name)
            } else {
                name.clone()
            };
            (key, tensor.clone())
        })
        .collect();
    if tensors.len() != entries.len() {
        warn!("duplicate names collapsed while writing {}", path.display());
    }
    candle_core::safetensors::save(&tensors, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<(String, Tensor)> {
        let dev = Device::Cpu;
        vec![
            (
                "fc.weight".to_string(),
                Tensor::arange(0f32, 6f32, &dev).unwrap().reshape((2, 3)).unwrap(),
            ),
            ("fc.bias".to_string(), Tensor::ones(2, DType::F32, &dev).unwrap()),
        ]
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            CheckpointFormat::from_path(Path::new("m.pth")).unwrap(),
            CheckpointFormat::Pickle
        );
        assert_eq!(
            CheckpointFormat::from_path(Path::new("m.SafeTensors")).unwrap(),
            CheckpointFormat::SafeTensors
        );
        assert_eq!(
            CheckpointFormat::from_path(Path::new("m.bin")).unwrap(),
            CheckpointFormat::Bundle
        );
        assert!(CheckpointFormat::from_path(Path::new("m.onnx")).is_err());
    }

    #[test]
    fn test_bundle_wrapped_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.bin");
        save_bundle(&path, &sample_entries(), Some(&ModelConfig::default())).unwrap();

        let raw = read_checkpoint(&path, &Device::Cpu).unwrap();
        assert!(raw.is_wrapped());
        let entries = raw.into_state_dict();
        assert_eq!(entries[0].0, "fc.weight");
        assert_eq!(entries[0].1.dims(), &[2, 3]);
        assert_eq!(
            entries[0].1.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]
        );
    }

    #[test]
    fn test_bundle_flat_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.bin");
        save_bundle(&path, &sample_entries(), None).unwrap();

        let raw = read_checkpoint(&path, &Device::Cpu).unwrap();
        assert!(!raw.is_wrapped());
        assert_eq!(raw.entries().len(), 2);
    }

    #[test]
    fn test_safetensors_state_dict_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.safetensors");
        save_safetensors(&path, &sample_entries(), true).unwrap();

        let raw = read_checkpoint(&path, &Device::Cpu).unwrap();
        assert!(raw.is_wrapped());
        let names: Vec<&str> = raw.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["fc.bias", "fc.weight"]);
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn test_pth_flat_state_dict() {
        let raw = read_checkpoint(&fixture("lstm_flat.pth"), &Device::Cpu).unwrap();
        assert!(!raw.is_wrapped());
        assert_eq!(raw.entries().len(), 10);

        let (_, bias) = raw.entries().iter().find(|(n, _)| n == "fc.1.bias").unwrap();
        assert_eq!(bias.to_vec1::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
        let (_, weight) = raw
            .entries()
            .iter()
            .find(|(n, _)| n == "lstm.weight_ih_l0")
            .unwrap();
        assert_eq!(weight.dims(), &[8, 2]);
    }

    #[test]
    fn test_pth_wrapped_state_dict() {
        let raw = read_checkpoint(&fixture("head_wrapped.pth"), &Device::Cpu).unwrap();
        assert!(raw.is_wrapped());

        let mut names: Vec<&str> = raw.entries().iter().map(|(n, _)| n.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["module.fc.1.bias", "module.fc.1.weight"]);

        let (_, weight) = raw
            .entries()
            .iter()
            .find(|(n, _)| n == "module.fc.1.weight")
            .unwrap();
        assert_eq!(
            weight.to_vec2::<f32>().unwrap()[2],
            vec![0.8, 0.9, 1.0, 1.1]
        );
    }

    #[test]
    fn test_record_length_mismatch() {
        let record = TensorRecord {
            name: "w".into(),
            shape: vec![2, 2],
            data: vec![1.0; 3],
        };
        assert!(record.to_tensor(&Device::Cpu).is_err());
    }
}
