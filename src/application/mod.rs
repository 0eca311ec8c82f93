// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for one goal at a time:
// training a model, or generating text from a trained one.
//
// Rules for this layer:
//   - No tensor math here (Layer 5)
//   - No printing beyond progress logs (Layer 1 owns the UI)
//   - No direct file formats (Layers 4 and 6 own those)

// The training workflow
pub mod train_use_case;

// The generation/evaluation workflow
pub mod generate_use_case;
