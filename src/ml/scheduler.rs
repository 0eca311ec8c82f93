// ============================================================
// Layer 5 — Multi-Task Scheduler
// ============================================================
// Interleaves the captioning and answering streams in lockstep:
// one batch from each per optimization step, losses combined
// under per-task weights before a single backward pass.
//
// The streams rarely have the same number of batches. The
// remainder policy decides what happens when the shorter one
// runs dry:
//
//   StopAtShorter — end the epoch (unseen batches return next
//                   epoch after reshuffling)
//   DrainLonger   — keep yielding single-task steps until both
//                   streams are exhausted
//
// Loss accounting is per task and normalized by each task's own
// batch count, so a task contributing fewer batches is not
// diluted in its reported mean.

use burn::prelude::*;

use crate::domain::policy::RemainderPolicy;

/// Relative loss weights for the two tasks.
#[derive(Config, Debug)]
pub struct TaskWeights {
    #[config(default = 1.0)]
    pub captioning: f64,
    #[config(default = 1.0)]
    pub vqa: f64,
}

impl TaskWeights {
    /// Weighted sum of the two scalar losses.
    pub fn combine<B: Backend>(&self, caption: Tensor<B, 1>, vqa: Tensor<B, 1>) -> Tensor<B, 1> {
        caption.mul_scalar(self.captioning) + vqa.mul_scalar(self.vqa)
    }
}

/// One scheduled step. A Pair drives the weighted joint loss;
/// the single-task variants only appear under DrainLonger.
#[derive(Debug)]
pub enum InterleavedStep<C, Q> {
    Pair(C, Q),
    CaptionOnly(C),
    VqaOnly(Q),
}

/// Lockstep iterator over the two batch streams.
pub struct InterleavedSchedule<I, J> {
    captions: I,
    questions: J,
    policy: RemainderPolicy,
}

impl<I, J> InterleavedSchedule<I, J> {
    pub fn new(captions: I, questions: J, policy: RemainderPolicy) -> Self {
        Self { captions, questions, policy }
    }
}

impl<I, J> Iterator for InterleavedSchedule<I, J>
where
    I: Iterator,
    J: Iterator,
{
    type Item = InterleavedStep<I::Item, J::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        match (self.captions.next(), self.questions.next()) {
            (Some(c), Some(q)) => Some(InterleavedStep::Pair(c, q)),
            (Some(c), None) if self.policy == RemainderPolicy::DrainLonger => {
                Some(InterleavedStep::CaptionOnly(c))
            }
            (None, Some(q)) if self.policy == RemainderPolicy::DrainLonger => {
                Some(InterleavedStep::VqaOnly(q))
            }
            _ => None,
        }
    }
}

/// Running mean of one task's loss, normalized by that task's
/// own batch count.
#[derive(Debug, Default, Clone)]
pub struct TaskLossMeter {
    sum:     f64,
    batches: usize,
}

impl TaskLossMeter {
    pub fn record(&mut self, loss: f64) {
        self.sum += loss;
        self.batches += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.sum / self.batches as f64
        }
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.batches = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    #[test]
    fn test_stop_at_shorter_ends_with_shorter_stream() {
        let schedule =
            InterleavedSchedule::new(0..10, 0..7, RemainderPolicy::StopAtShorter);
        let steps: Vec<_> = schedule.collect();
        assert_eq!(steps.len(), 7);
        assert!(steps.iter().all(|s| matches!(s, InterleavedStep::Pair(_, _))));
    }

    #[test]
    fn test_drain_longer_yields_single_task_tail() {
        let schedule =
            InterleavedSchedule::new(0..10, 0..7, RemainderPolicy::DrainLonger);
        let steps: Vec<_> = schedule.collect();
        assert_eq!(steps.len(), 10);
        assert!(matches!(steps[6], InterleavedStep::Pair(_, _)));
        assert!(matches!(steps[7], InterleavedStep::CaptionOnly(_)));
        assert!(matches!(steps[9], InterleavedStep::CaptionOnly(_)));
    }

    #[test]
    fn test_drain_longer_vqa_tail() {
        let schedule = InterleavedSchedule::new(0..2, 0..5, RemainderPolicy::DrainLonger);
        let steps: Vec<_> = schedule.collect();
        assert_eq!(steps.len(), 5);
        assert!(matches!(steps[4], InterleavedStep::VqaOnly(_)));
    }

    #[test]
    fn test_weighted_combination() {
        let device = Default::default();
        let caption = Tensor::<TestBackend, 1>::from_floats([2.0], &device);
        let vqa = Tensor::<TestBackend, 1>::from_floats([3.0], &device);
        let weights = TaskWeights::new().with_captioning(0.5).with_vqa(2.0);
        let combined = weights.combine(caption, vqa).into_scalar();
        assert!((combined - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_meter_normalizes_by_own_batch_count() {
        let mut meter = TaskLossMeter::default();
        meter.record(2.0);
        meter.record(4.0);
        assert_eq!(meter.batches(), 2);
        assert!((meter.mean() - 3.0).abs() < 1e-9);

        meter.reset();
        assert_eq!(meter.mean(), 0.0);
    }
}
