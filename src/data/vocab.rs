//! Label vocabulary
//!
//! Handles:
//! - Discovering labels from the training-artifact directory tree
//! - Label to output index mapping
//! - Output index to label reverse mapping

use crate::error::{GestureError, Result};
use log::{info, warn};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::Path;

/// Labels used when no training artifacts are available
pub const DEFAULT_LABELS: [&str; 5] = ["Food", "I", "Sorry", "ThankYou", "Water"];

/// Where a vocabulary came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VocabSource {
    Discovered,
    Default,
}

/// Ordered, index-stable label set
#[derive(Clone, Debug)]
pub struct Vocab {
    /// Output index → label
    labels: Vec<String>,
    /// Label → output index
    label_to_id: FxHashMap<String, usize>,
    source: VocabSource,
}

impl Vocab {
    /// Build a vocabulary from an explicit label list, keeping its order
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(GestureError::Vocab("vocabulary must not be empty".into()));
        }

        let mut label_to_id = FxHashMap::default();
        for (idx, label) in labels.iter().enumerate() {
            if label_to_id.insert(label.clone(), idx).is_some() {
                return Err(GestureError::Vocab(format!("duplicate label '{}'", label)));
            }
        }

        Ok(Vocab {
            labels,
            label_to_id,
            source: VocabSource::Default,
        })
    }

    /// Fixed fallback vocabulary
    pub fn default_labels() -> Self {
        Vocab {
            labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            label_to_id: DEFAULT_LABELS
                .iter()
                .enumerate()
                .map(|(idx, s)| (s.to_string(), idx))
                .collect(),
            source: VocabSource::Default,
        }
    }

    /// Sorted names of the immediate subdirectories of `root`, or `fallback`
    /// when the directory is missing, unreadable or has no subdirectories
    pub fn discover(root: &Path, fallback: Vocab) -> Self {
        match Self::read_label_dirs(root) {
            Ok(mut names) if !names.is_empty() => {
                names.sort();
                let mut label_to_id = FxHashMap::default();
                for (idx, name) in names.iter().enumerate() {
                    label_to_id.insert(name.clone(), idx);
                }
                info!(
                    "discovered {} labels under {}: {:?}",
                    names.len(),
                    root.display(),
                    names
                );
                Vocab {
                    labels: names,
                    label_to_id,
                    source: VocabSource::Discovered,
                }
            }
            Ok(_) => {
                warn!(
                    "no label directories under {}, using default vocabulary",
                    root.display()
                );
                fallback
            }
            Err(e) => {
                warn!(
                    "cannot read label directory {} ({}), using default vocabulary",
                    root.display(),
                    e
                );
                fallback
            }
        }
    }

    fn read_label_dirs(root: &Path) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            // Non-UTF-8 names cannot be reported back as labels
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Label at output position `idx`
    pub fn label(&self, idx: usize) -> Option<&str> {
        self.labels.get(idx).map(String::as_str)
    }

    /// Output position of `label`
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.label_to_id.get(label).copied()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn size(&self) -> usize {
        self.labels.len()
    }

    pub fn source(&self) -> VocabSource {
        self.source
    }
}

impl Default for Vocab {
    fn default() -> Self {
        Self::default_labels()
    }
}
