// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn tensor math lives in this layer.
//
// What's in this layer:
//
//   attention.rs      — scaled dot-product multi-head attention,
//                       the feed-forward block, and the pre-norm
//                       residual layer built from both
//   mapper.rs         — the prefix mappers (MLP and Transformer
//                       variants) that turn one visual embedding
//                       into prefix_length soft-prompt vectors
//   language_model.rs — a compact GPT-style causal LM exposing
//                       the embed/forward-on-embeddings boundary
//   model.rs          — CaptionModel: prefix ⊕ token embeddings
//                       → language model → logits
//   loss.rs           — masked cross-entropy over loss-mask
//                       selected positions
//   decoder.rs        — batched greedy decoding with per-sequence
//                       early stopping
//   scheduler.rs      — multi-task interleaving and per-task
//                       loss accounting
//   trainer.rs        — the single-task and multi-task training
//                       loops (AdamW, warmup, validation,
//                       checkpointing)

pub mod attention;
pub mod mapper;
pub mod language_model;
pub mod model;
pub mod loss;
pub mod decoder;
pub mod scheduler;
pub mod trainer;
