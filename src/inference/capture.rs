//! Save incoming sequences for offline comparison with training samples

use crate::error::Result;
use crate::inference::normalize::frame_width;
use candle_core::{Device, Tensor};
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// What was written and what it looked like
#[derive(Clone, Debug, Serialize)]
pub struct CaptureSummary {
    pub path: PathBuf,
    pub shape: [usize; 2],
    pub min: f32,
    pub max: f32,
}

/// Writes raw request sequences as `seq_<unix_millis>.npy`
pub struct SequenceCapture {
    dir: PathBuf,
}

impl SequenceCapture {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        SequenceCapture {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Store `frames` as-is, without padding or truncation
    pub fn save(&self, frames: &[Vec<f32>]) -> Result<CaptureSummary> {
        let width = frame_width(frames)?;
        fs::create_dir_all(&self.dir)?;

        let data: Vec<f32> = frames.iter().flatten().copied().collect();
        let min = data.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = data.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let path = self.unused_path(millis);
        Tensor::from_vec(data, (frames.len(), width), &Device::Cpu)?.write_npy(&path)?;

        info!("saved sequence to {} shape=({}, {})", path.display(), frames.len(), width);
        Ok(CaptureSummary {
            path,
            shape: [frames.len(), width],
            min,
            max,
        })
    }

    fn unused_path(&self, millis: u128) -> PathBuf {
        let mut path = self.dir.join(format!("seq_{}.npy", millis));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("seq_{}_{}.npy", millis, n));
            n += 1;
        }
        path
    }
}
