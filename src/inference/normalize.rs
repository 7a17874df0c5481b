//! Fixed-window sequence normalization
//!
//! Requests carry any number of frames; the model wants exactly
//! `target_frames`. Short sequences are right-padded with zero frames,
//! long ones truncated to their first `target_frames` frames. Frame width
//! is not checked against the model here.

use crate::error::{GestureError, Result};
use candle_core::{Device, Tensor};
use serde::Deserialize;

/// Request payload: a list of frames, or a single flat frame
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawSequence {
    Frames(Vec<Vec<f32>>),
    Flat(Vec<f32>),
}

impl RawSequence {
    pub fn into_frames(self) -> Vec<Vec<f32>> {
        match self {
            RawSequence::Frames(frames) => frames,
            RawSequence::Flat(frame) => vec![frame],
        }
    }
}

/// Width shared by every frame, or why there is none
pub fn frame_width(frames: &[Vec<f32>]) -> Result<usize> {
    let first = frames
        .first()
        .ok_or_else(|| GestureError::InvalidSequence("sequence is empty".into()))?;
    let width = first.len();
    if width == 0 {
        return Err(GestureError::InvalidSequence("frames carry no features".into()));
    }

    for (idx, frame) in frames.iter().enumerate() {
        if frame.len() != width {
            return Err(GestureError::InvalidSequence(format!(
                "frame {} has {} values, frame 0 has {}",
                idx,
                frame.len(),
                width
            )));
        }
        if let Some(pos) = frame.iter().position(|v| !v.is_finite()) {
            return Err(GestureError::InvalidSequence(format!(
                "frame {} has a non-finite value at position {}",
                idx, pos
            )));
        }
    }
    Ok(width)
}

/// A sequence padded or truncated to the fixed window
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedSequence {
    /// Row-major (frames, width)
    data: Vec<f32>,
    frames: usize,
    width: usize,
    /// Frame count before normalization
    source_frames: usize,
}

impl NormalizedSequence {
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn source_frames(&self) -> usize {
        self.source_frames
    }

    pub fn frame(&self, idx: usize) -> Option<&[f32]> {
        if idx >= self.frames {
            return None;
        }
        Some(&self.data[idx * self.width..(idx + 1) * self.width])
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Batch of one: (1, frames, width)
    pub fn to_batch(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(
            &self.data,
            (1, self.frames, self.width),
            device,
        )?)
    }
}

/// Pads or truncates sequences to a fixed frame count
#[derive(Clone, Copy, Debug)]
pub struct SequenceNormalizer {
    target_frames: usize,
}

impl SequenceNormalizer {
    pub fn new(target_frames: usize) -> Result<Self> {
        if target_frames == 0 {
            return Err(GestureError::Config("target_frames must be at least 1".into()));
        }
        Ok(SequenceNormalizer { target_frames })
    }

    pub fn target_frames(&self) -> usize {
        self.target_frames
    }

    pub fn normalize(&self, frames: &[Vec<f32>]) -> Result<NormalizedSequence> {
        let width = frame_width(frames)?;
        let mut data = vec![0.0f32; self.target_frames * width];
        for (idx, frame) in frames.iter().take(self.target_frames).enumerate() {
            data[idx * width..(idx + 1) * width].copy_from_slice(frame);
        }

        Ok(NormalizedSequence {
            data,
            frames: self.target_frames,
            width,
            source_frames: frames.len(),
        })
    }

    pub fn normalize_raw(&self, raw: RawSequence) -> Result<NormalizedSequence> {
        self.normalize(&raw.into_frames())
    }
}
