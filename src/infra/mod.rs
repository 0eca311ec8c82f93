// ============================================================
// Layer 6 — Infrastructure
// ============================================================
// Disk-facing concerns: checkpoints, the metrics CSV, the
// tokenizer store, and the evaluation record file. Nothing in
// this layer knows about tensors beyond save/load.

pub mod checkpoint;
pub mod evaluation;
pub mod metrics;
pub mod tokenizer_store;
