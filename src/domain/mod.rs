// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types that define the core concepts of the system.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or tensor math
//   - Only plain structs and enums
//
// Why keep this layer pure?
//   - Easy to unit test (no GPU needed)
//   - Easy to understand (no framework noise)
//   - The data and ml layers agree on these types without
//     depending on each other

// Raw dataset records and the evaluation output record
pub mod records;

// Behavioral policies the pipeline is configured with
// (QA overflow, multi-task remainder)
pub mod policy;
