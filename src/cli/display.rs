//! Terminal rendering of predictions and load diagnostics
//!
//! Features:
//! - Ranked probability bars with color coding
//! - Checkpoint load summary
//! - Capture summary

use crate::inference::{CaptureSummary, Prediction};
use crate::model::reconcile::LoadStatus;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{stdout, Write};

const BAR_WIDTH: usize = 30;

/// Terminal display manager
#[derive(Default)]
pub struct Display;

impl Display {
    pub fn new() -> Self {
        Display
    }

    /// Show the predicted label and every class probability, highest first
    pub fn show_prediction(&self, prediction: &Prediction) -> Result<(), Box<dyn std::error::Error>> {
        let mut stdout = stdout();

        execute!(
            stdout,
            SetForegroundColor(Color::Cyan),
            Print("Prediction: "),
            ResetColor,
            Print(&prediction.label),
            Print("  "),
            SetForegroundColor(confidence_color(prediction.confidence)),
            Print(format!("{:.1}%", prediction.confidence * 100.0)),
            ResetColor,
            Print("\n")
        )?;

        let width = prediction
            .distribution
            .iter()
            .map(|(l, _)| l.chars().count())
            .max()
            .unwrap_or(0);

        for (label, prob) in prediction.ranked() {
            let filled = ((prob * BAR_WIDTH as f32).round() as usize).min(BAR_WIDTH);
            let color = if label == prediction.label {
                Color::Green
            } else {
                Color::DarkGrey
            };
            execute!(
                stdout,
                Print(format!("  {:<width$} ", label, width = width)),
                SetForegroundColor(color),
                Print("█".repeat(filled)),
                ResetColor,
                Print("░".repeat(BAR_WIDTH - filled)),
                Print(format!(" {:.3}\n", prob))
            )?;
        }

        stdout.flush()?;
        Ok(())
    }

    /// Summarize how the checkpoint was applied
    pub fn show_load_status(&self, status: &LoadStatus) -> Result<(), Box<dyn std::error::Error>> {
        let mut stdout = stdout();

        match status {
            LoadStatus::RandomInit { reason } => {
                execute!(
                    stdout,
                    SetForegroundColor(Color::Red),
                    Print("Weights: random initialization\n"),
                    ResetColor,
                    Print(format!("Reason: {}\n", reason))
                )?;
            }
            LoadStatus::Loaded(report) => {
                let color = if report.is_partial() {
                    Color::Yellow
                } else {
                    Color::Green
                };
                execute!(
                    stdout,
                    SetForegroundColor(color),
                    Print(format!("Weights: loaded via {}", report.strategy)),
                    ResetColor,
                    Print(format!(
                        "  |  loaded {}  |  missing {}  |  unexpected {}  |  mismatched {}\n",
                        report.loaded.len(),
                        report.missing.len(),
                        report.unexpected.len(),
                        report.mismatched.len()
                    ))
                )?;
                for name in &report.missing {
                    execute!(
                        stdout,
                        SetForegroundColor(Color::Yellow),
                        Print(format!("  missing: {}\n", name)),
                        ResetColor
                    )?;
                }
                for conflict in &report.mismatched {
                    execute!(
                        stdout,
                        SetForegroundColor(Color::Red),
                        Print(format!(
                            "  mismatched: {} model {:?} checkpoint {:?}\n",
                            conflict.name, conflict.model, conflict.checkpoint
                        )),
                        ResetColor
                    )?;
                }
                for name in &report.unexpected {
                    execute!(
                        stdout,
                        SetForegroundColor(Color::DarkGrey),
                        Print(format!("  unexpected: {}\n", name)),
                        ResetColor
                    )?;
                }
            }
        }

        stdout.flush()?;
        Ok(())
    }

    pub fn show_capture(&self, summary: &CaptureSummary) -> Result<(), Box<dyn std::error::Error>> {
        let mut stdout = stdout();

        execute!(
            stdout,
            SetForegroundColor(Color::Magenta),
            Print("Saved: "),
            ResetColor,
            Print(format!(
                "{}  shape=({}, {})  min={:.4}  max={:.4}\n",
                summary.path.display(),
                summary.shape[0],
                summary.shape[1],
                summary.min,
                summary.max
            ))
        )?;
        stdout.flush()?;
        Ok(())
    }
}

fn confidence_color(confidence: f32) -> Color {
    if confidence > 0.9 {
        Color::Green
    } else if confidence > 0.5 {
        Color::Yellow
    } else {
        Color::Red
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_color_thresholds() {
        assert_eq!(confidence_color(0.95), Color::Green);
        assert_eq!(confidence_color(0.6), Color::Yellow);
        assert_eq!(confidence_color(0.2), Color::Red);
    }
}
