// ============================================================
// Layer 4 — Prefix Batcher
// ============================================================
// Implements Burn's Batcher trait to convert a Vec<PrefixExample>
// into GPU-ready tensors.
//
// How batching works here:
//   Input:  Vec of N examples, each pre-padded to the same
//           lengths at dataset build time
//   Output: PrefixBatch with tensors of shape [N, ...]
//
//   We flatten each field into one long Vec, then reshape:
//   [s1_t1, ..., s1_tS, s2_t1, ..., sN_tS] → [N, S]
//
// Dynamic padding is never needed — the mask builder froze the
// lengths per dataset.

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::PrefixExample;

/// A batch of examples ready for the model forward pass.
/// All tensors have batch_size as their first dimension.
#[derive(Debug, Clone)]
pub struct PrefixBatch<B: Backend> {
    /// Token id sequences — shape: [batch_size, max_seq_len]
    pub tokens: Tensor<B, 2, Int>,

    /// Attention masks — [batch_size, prefix_length + max_seq_len]
    pub attention_mask: Tensor<B, 2>,

    /// Loss masks — [batch_size, prefix_length + max_seq_len]
    pub loss_mask: Tensor<B, 2>,

    /// Visual embeddings — [batch_size, prefix_dim]
    pub visual: Tensor<B, 2>,
}

/// Holds the target device so tensors are created on the
/// correct GPU/CPU.
#[derive(Clone, Debug)]
pub struct PrefixBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> PrefixBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<PrefixExample, PrefixBatch<B>> for PrefixBatcher<B> {
    fn batch(&self, items: Vec<PrefixExample>) -> PrefixBatch<B> {
        let batch_size = items.len();
        let seq_len = items[0].tokens.len();
        let mask_len = items[0].attention_mask.len();
        let prefix_dim = items[0].visual.len();

        let token_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.tokens.iter().map(|&t| t as i32))
            .collect();

        let attn_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.attention_mask.iter().copied())
            .collect();

        let loss_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.loss_mask.iter().copied())
            .collect();

        let visual_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.visual.iter().copied())
            .collect();

        let tokens = Tensor::<B, 1, Int>::from_ints(token_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);

        let attention_mask = Tensor::<B, 1>::from_floats(attn_flat.as_slice(), &self.device)
            .reshape([batch_size, mask_len]);

        let loss_mask = Tensor::<B, 1>::from_floats(loss_flat.as_slice(), &self.device)
            .reshape([batch_size, mask_len]);

        let visual = Tensor::<B, 1>::from_floats(visual_flat.as_slice(), &self.device)
            .reshape([batch_size, prefix_dim]);

        PrefixBatch { tokens, attention_mask, loss_mask, visual }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray;

    fn example(token: u32) -> PrefixExample {
        PrefixExample {
            tokens:         vec![token, token + 1, 0],
            attention_mask: vec![1.0, 1.0, 1.0, 1.0, 0.0],
            loss_mask:      vec![1.0, 1.0, 1.0, 1.0, 0.0],
            visual:         vec![0.25; 4],
        }
    }

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batcher = PrefixBatcher::<TestBackend>::new(device);
        let batch = batcher.batch(vec![example(5), example(8)]);
        assert_eq!(batch.tokens.dims(), [2, 3]);
        assert_eq!(batch.attention_mask.dims(), [2, 5]);
        assert_eq!(batch.loss_mask.dims(), [2, 5]);
        assert_eq!(batch.visual.dims(), [2, 4]);
    }

    #[test]
    fn test_batch_preserves_row_order() {
        let device = Default::default();
        let batcher = PrefixBatcher::<TestBackend>::new(device);
        let batch = batcher.batch(vec![example(5), example(8)]);
        let ids: Vec<i64> = batch.tokens.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(ids, vec![5, 6, 0, 8, 9, 0]);
    }
}
