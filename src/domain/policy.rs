// ============================================================
// Layer 3 — Pipeline Policies
// ============================================================
// Two places in the pipeline have more than one defensible
// behavior:
//
//   1. A question+answer pair that does not fit in max_seq_len
//      can keep its slot without supervision, or be excluded.
//   2. A multi-task epoch can stop when the shorter of the two
//      dataloaders runs dry, or drain the longer one.
//
// Both choices live here as explicit enums so they are visible
// in the config file and testable in isolation.

use serde::{Deserialize, Serialize};

/// Which task(s) a training run optimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainTask {
    /// Image captioning only
    Captioning,
    /// Visual question answering only
    Vqa,
    /// Interleaved captioning + VQA with a weighted joint loss
    MultiTask,
}

/// What to do with a QA example whose question + answer exceed
/// the dataset's token capacity (`rest_len < 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Keep the example but zero both masks over the text region:
    /// it contributes no loss and the model attends only to the
    /// prefix.
    ZeroSupervision,
    /// Exclude the example from the dataset entirely.
    Drop,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::ZeroSupervision
    }
}

/// What to do when one task's dataloader outlives the other
/// within a multi-task epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemainderPolicy {
    /// End the epoch at the shorter loader; the longer task is
    /// under-sampled within the epoch but reshuffles next epoch.
    StopAtShorter,
    /// Keep stepping the longer loader alone, with only that
    /// task's weighted loss, until it too is exhausted.
    DrainLonger,
}

impl Default for RemainderPolicy {
    fn default() -> Self {
        Self::StopAtShorter
    }
}
