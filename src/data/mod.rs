// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from serialized dataset splits on disk to
// GPU-ready tensor batches.
//
// The pipeline flows in this order:
//
//   split file (JSON)
//       │
//       ▼
//   storage          → embeddings array + raw text records
//       │
//       ▼
//   Tokenizer        → token ids (tokenized once, cached)
//       │
//       ▼
//   masking          → padded tokens + attention mask + loss mask
//       │
//       ▼
//   PrefixDataset    → implements Burn's Dataset trait
//       │
//       ▼
//   PrefixBatcher    → stacks examples into tensor batches
//       │
//       ▼
//   DataLoader       → feeds batches to the training loop
//
// Each module is responsible for exactly one step.

/// Serialized split containers (embeddings + raw records)
pub mod storage;

/// Token padding and the attention/loss mask construction
pub mod masking;

/// Implements Burn's Dataset trait over masked examples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
