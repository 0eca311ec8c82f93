// ============================================================
// Layer 6 — Evaluation Records
// ============================================================
// Persists generation results next to their ground truth, as a
// JSON object keyed by example index:
//
//   {
//     "0": { "image_id": 42, "question": "...", "reference": "...",
//            "predicted": "..." },
//     "1": { ... }
//   }
//
// Keyed rather than listed so downstream scoring scripts can
// join on the index without caring about ordering.

use anyhow::{ensure, Context, Result};
use std::{collections::BTreeMap, fs, path::Path};

use crate::domain::records::EvaluationRecord;

/// Write one record per generated sequence. Fails when the
/// prediction count does not match the ground-truth count —
/// a misalignment here silently corrupts every score computed
/// downstream.
pub fn write_evaluation_records(
    path:       &Path,
    records:    &[EvaluationRecord],
    prediction_count: usize,
) -> Result<()> {
    ensure!(
        records.len() == prediction_count,
        "evaluation record count {} does not match prediction count {}",
        records.len(),
        prediction_count
    );

    let keyed: BTreeMap<String, &EvaluationRecord> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (i.to_string(), r))
        .collect();

    let json = serde_json::to_string_pretty(&keyed)?;
    fs::write(path, json)
        .with_context(|| format!("Cannot write evaluation records to '{}'", path.display()))?;
    tracing::info!("Wrote {} evaluation records to '{}'", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, predicted: &str) -> EvaluationRecord {
        EvaluationRecord {
            image_id:  id,
            question:  Some("what color".into()),
            reference: "blue".into(),
            predicted: predicted.into(),
        }
    }

    #[test]
    fn test_records_keyed_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let records = vec![record(1, "blue"), record(2, "green")];
        write_evaluation_records(&path, &records, 2).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["0"]["image_id"], 1);
        assert_eq!(json["1"]["predicted"], "green");
    }

    #[test]
    fn test_count_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let records = vec![record(1, "blue")];
        assert!(write_evaluation_records(&path, &records, 3).is_err());
    }
}
