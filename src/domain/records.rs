// ============================================================
// Layer 3 — Dataset and Evaluation Records
// ============================================================
// The raw, text-level records as they arrive from dataset
// storage, plus the record produced per example at evaluation
// time. Token ids, masks and tensors never appear here —
// those belong to Layer 4 and Layer 5.

use serde::{Deserialize, Serialize};

/// One raw captioning record from a dataset split.
///
/// `embedding_index` points into the split's separately stored
/// array of visual embeddings — several captions may share one
/// image and therefore one embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub image_id:        i64,
    pub caption:         String,
    pub embedding_index: usize,
}

/// One raw question-answering record from a dataset split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaRecord {
    pub image_id:        i64,
    pub question:        String,
    pub answer:          String,
    pub embedding_index: usize,
}

/// One line of the aggregate record file written per validation
/// generation run: what the model produced next to the ground
/// truth it should have produced.
///
/// `question` is None for pure captioning splits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub image_id:  i64,
    pub question:  Option<String>,
    pub reference: String,
    pub predicted: String,
}
