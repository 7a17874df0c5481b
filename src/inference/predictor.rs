//! Logits to prediction
//!
//! Raw scores become a probability distribution over the vocabulary; the
//! arg-max label and its probability are the prediction.

use crate::data::Vocab;
use crate::error::{GestureError, Result};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Predicted label with the full distribution behind it
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    /// Probability of `label`, the largest entry of `distribution`
    pub confidence: f32,
    /// Label → probability, in vocabulary order
    #[serde(rename = "probs", serialize_with = "serialize_distribution")]
    pub distribution: Vec<(String, f32)>,
}

impl Prediction {
    pub fn probability(&self, label: &str) -> Option<f32> {
        self.distribution
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, p)| *p)
    }

    /// Labels sorted by descending probability
    pub fn ranked(&self) -> Vec<(String, f32)> {
        let mut ranked = self.distribution.clone();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }
}

fn serialize_distribution<S: Serializer>(
    distribution: &[(String, f32)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(distribution.len()))?;
    for (label, prob) in distribution {
        map.serialize_entry(label, prob)?;
    }
    map.end()
}

/// Numerically stable softmax: the max is subtracted before exponentiating
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return vec![];
    }

    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.iter().map(|&x| x / sum).collect()
}

/// Index of the largest value; ties go to the lowest index
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((idx, v)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Turn one row of logits into a prediction over `vocab`
pub fn classify(logits: &[f32], vocab: &Vocab) -> Result<Prediction> {
    if logits.len() != vocab.size() {
        return Err(GestureError::Vocab(format!(
            "model produced {} scores for {} labels",
            logits.len(),
            vocab.size()
        )));
    }
    if logits.iter().any(|v| !v.is_finite()) {
        return Err(GestureError::InvalidSequence(
            "model produced non-finite scores".into(),
        ));
    }

    let probs = softmax(logits);
    let top = argmax(&probs)
        .ok_or_else(|| GestureError::Vocab("empty vocabulary".into()))?;

    let distribution: Vec<(String, f32)> = vocab
        .labels()
        .iter()
        .cloned()
        .zip(probs.iter().copied())
        .collect();

    Ok(Prediction {
        label: distribution[top].0.clone(),
        confidence: probs[top],
        distribution,
    })
}
