// ============================================================
// Layer 4 — Split Storage
// ============================================================
// Reads one serialized container per dataset split. A container
// holds the visual embeddings for the split (one fixed-length
// f32 vector per image) next to the raw text records, each of
// which points into the embedding array by index.
//
// Several records may share one embedding (one image can carry
// five captions), which is why the indirection exists instead
// of embedding the vector into each record.
//
// The container is consumed read-only; tokenization and mask
// construction happen downstream in dataset.rs.

use anyhow::{ensure, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;

use crate::domain::records::{CaptionRecord, QaRecord};

/// One dataset split: the shared embedding array plus the raw
/// records of whichever record type the split carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitStorage<R> {
    /// Visual embeddings, all the same length (512 for ViT
    /// features, 640 for ResNet features)
    pub embeddings: Vec<Vec<f32>>,

    /// Raw text records, each indexing into `embeddings`
    pub records: Vec<R>,
}

pub type CaptionSplit = SplitStorage<CaptionRecord>;
pub type QaSplit = SplitStorage<QaRecord>;

impl<R: DeserializeOwned> SplitStorage<R> {
    /// Load a split container from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read dataset split '{}'", path.display()))?;
        let split: Self = serde_json::from_str(&json)
            .with_context(|| format!("Cannot parse dataset split '{}'", path.display()))?;
        Ok(split)
    }
}

impl<R: Clone> SplitStorage<R> {
    /// Shuffle the records and hold out the tail as a validation
    /// split. Both halves keep the full embedding array, since
    /// records address it by index.
    pub fn split_train_val(self, train_fraction: f64, seed: u64) -> (Self, Self) {
        use rand::{seq::SliceRandom, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut records = self.records;
        records.shuffle(&mut rng);
        let cut = ((records.len() as f64) * train_fraction).round() as usize;
        let val_records = records.split_off(cut.min(records.len()));
        (
            Self { embeddings: self.embeddings.clone(), records },
            Self { embeddings: self.embeddings, records: val_records },
        )
    }
}

impl<R> SplitStorage<R> {
    /// Dimension of the visual embeddings in this split.
    pub fn embedding_dim(&self) -> usize {
        self.embeddings.first().map(|e| e.len()).unwrap_or(0)
    }

    /// Check the container invariants: at least one embedding,
    /// uniform embedding length, and every record index in range.
    pub fn validate(&self, index_of: impl Fn(&R) -> usize) -> Result<()> {
        ensure!(!self.embeddings.is_empty(), "split contains no embeddings");
        let dim = self.embedding_dim();
        ensure!(
            self.embeddings.iter().all(|e| e.len() == dim),
            "split contains embeddings of mixed dimension"
        );
        for (i, record) in self.records.iter().enumerate() {
            let idx = index_of(record);
            ensure!(
                idx < self.embeddings.len(),
                "record {} points at embedding {} but split only has {}",
                i,
                idx,
                self.embeddings.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caption_split() -> CaptionSplit {
        SplitStorage {
            embeddings: vec![vec![0.0; 4], vec![1.0; 4]],
            records:    vec![
                CaptionRecord { image_id: 1, caption: "a dog runs".into(), embedding_index: 0 },
                CaptionRecord { image_id: 1, caption: "a dog".into(), embedding_index: 0 },
                CaptionRecord { image_id: 2, caption: "a cat sits".into(), embedding_index: 1 },
            ],
        }
    }

    #[test]
    fn test_validate_accepts_shared_embedding_indices() {
        let split = caption_split();
        assert!(split.validate(|r| r.embedding_index).is_ok());
        assert_eq!(split.embedding_dim(), 4);
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let mut split = caption_split();
        split.records[2].embedding_index = 9;
        assert!(split.validate(|r| r.embedding_index).is_err());
    }

    #[test]
    fn test_split_train_val_partitions_records() {
        let split = caption_split();
        let (train, val) = split.split_train_val(0.67, 7);
        assert_eq!(train.records.len(), 2);
        assert_eq!(val.records.len(), 1);
        // both halves keep the full embedding array
        assert_eq!(train.embeddings.len(), 2);
        assert_eq!(val.embeddings.len(), 2);
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_ic.json");
        std::fs::write(&path, serde_json::to_string(&caption_split()).unwrap()).unwrap();
        let loaded = CaptionSplit::load(&path).unwrap();
        assert_eq!(loaded.records.len(), 3);
        assert_eq!(loaded.records[2].caption, "a cat sits");
    }
}
