// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records per-epoch training metrics to a CSV file.
//
// Columns:
//   epoch               — 1, 2, 3, ...
//   train_caption_loss  — mean caption loss over the epoch
//   train_vqa_loss      — mean answering loss over the epoch
//   val_caption_loss    — caption loss on the validation split
//   val_vqa_loss        — answering loss on the validation split
//   learning_rate       — last scheduled rate of the epoch
//
// Single-task runs write NaN into the columns of the task they
// did not train; each task's mean is normalized by its own
// batch count, never the other task's.
//
// Output file: {dir}/metrics.csv

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

/// One row of metrics data for a single training epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:              usize,
    pub train_caption_loss: f64,
    pub train_vqa_loss:     f64,
    pub val_caption_loss:   f64,
    pub val_vqa_loss:       f64,
    pub learning_rate:      f64,
}

impl EpochMetrics {
    pub fn new(
        epoch:              usize,
        train_caption_loss: f64,
        train_vqa_loss:     f64,
        val_caption_loss:   f64,
        val_vqa_loss:       f64,
        learning_rate:      f64,
    ) -> Self {
        Self {
            epoch,
            train_caption_loss,
            train_vqa_loss,
            val_caption_loss,
            val_vqa_loss,
            learning_rate,
        }
    }
}

/// Appends epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet, so
    /// repeated runs append instead of clobbering history.
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(
                f,
                "epoch,train_caption_loss,train_vqa_loss,val_caption_loss,val_vqa_loss,learning_rate"
            )?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6},{:.6e}",
            m.epoch,
            m.train_caption_loss,
            m.train_vqa_loss,
            m.val_caption_loss,
            m.val_vqa_loss,
            m.learning_rate,
        )?;
        tracing::debug!(
            "Logged epoch {} metrics: caption={:.4}, vqa={:.4}",
            m.epoch,
            m.train_caption_loss,
            m.train_vqa_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_string_lossy().to_string();

        let logger = MetricsLogger::new(dir_str.clone()).unwrap();
        logger
            .log(&EpochMetrics::new(1, 2.5, f64::NAN, 2.3, f64::NAN, 2e-5))
            .unwrap();

        // reopening must append, not rewrite the header
        let logger = MetricsLogger::new(dir_str).unwrap();
        logger
            .log(&EpochMetrics::new(2, 2.1, f64::NAN, 2.0, f64::NAN, 2e-5))
            .unwrap();

        let contents = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("epoch,"));
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].starts_with("2,"));
    }
}
