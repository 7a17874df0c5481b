//! Training sample lookup and feature-width inference
//!
//! Samples are `.npy` arrays shaped `(frames, width)` stored under
//! `root/<label>/`. Only the first sample found is ever inspected; widths
//! are assumed homogeneous across a dataset.

use crate::data::vocab::Vocab;
use crate::error::{GestureError, Result};
use candle_core::{DType, Tensor};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// MediaPipe two-hand keypoints: 21 landmarks × (x, y, z) × 2 hands
pub const DEFAULT_FEATURE_DIM: usize = 126;

const SAMPLE_EXTENSION: &str = "npy";

/// First `.npy` sample in vocabulary order, with file names sorted inside
/// each label directory
pub fn first_sample(root: &Path, vocab: &Vocab) -> Option<(PathBuf, String)> {
    for label in vocab.labels() {
        let label_dir = root.join(label);
        let Ok(entries) = fs::read_dir(&label_dir) else {
            continue;
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == SAMPLE_EXTENSION))
            .collect();
        files.sort();

        if let Some(path) = files.into_iter().next() {
            return Some((path, label.clone()));
        }
    }
    None
}

/// Per-frame feature width of the first sample, or `default` if there is
/// no readable 2-D sample
pub fn infer_feature_dim(root: &Path, vocab: &Vocab, default: usize) -> usize {
    let Some((path, label)) = first_sample(root, vocab) else {
        info!("no samples under {}, assuming width {}", root.display(), default);
        return default;
    };

    match Tensor::read_npy(&path) {
        Ok(arr) => match arr.dims() {
            [_, width, ..] => {
                info!(
                    "feature width {} from sample {} (label '{}')",
                    width,
                    path.display(),
                    label
                );
                *width
            }
            dims => {
                warn!(
                    "sample {} has shape {:?}, expected (frames, width); assuming width {}",
                    path.display(),
                    dims,
                    default
                );
                default
            }
        },
        Err(e) => {
            warn!(
                "cannot read sample {} ({}); assuming width {}",
                path.display(),
                e,
                default
            );
            default
        }
    }
}

/// Load a `(frames, width)` sample as a list of frames
pub fn load_sample(path: &Path) -> Result<Vec<Vec<f32>>> {
    let arr = Tensor::read_npy(path)?;
    if arr.rank() != 2 {
        return Err(GestureError::InvalidSequence(format!(
            "sample {} has shape {:?}, expected (frames, width)",
            path.display(),
            arr.dims()
        )));
    }
    Ok(arr.to_dtype(DType::F32)?.to_vec2::<f32>()?)
}
