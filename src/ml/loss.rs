// ============================================================
// Layer 5 — Masked Cross-Entropy
// ============================================================
// Next-token loss over exactly the positions the loss mask
// selects.
//
// Alignment: logits at combined position p-1 predict the first
// token, so the slice [prefix_length-1 .. prefix_length+seq-1]
// lines logits up with the full token sequence one-to-one. The
// loss mask (already prefix-extended by the mask builder) is
// sliced the same way on the token side.
//
// Padding uses id 0, which is additionally excluded even when a
// mask bit is set — belt matching the mask builder's braces.
// The computation stays on-device end to end so gradients flow
// through log-softmax without a host round trip.

use burn::{prelude::*, tensor::activation::log_softmax};

/// Slice the logit rows that predict the token sequence.
///
/// `logits` is [batch, prefix_length + seq, vocab]; the result
/// is [batch, seq, vocab] where row t predicts token t.
pub fn shifted_logits<B: Backend>(logits: Tensor<B, 3>, prefix_length: usize) -> Tensor<B, 3> {
    let [batch, total, vocab] = logits.dims();
    let seq = total - prefix_length;
    logits.slice([0..batch, prefix_length - 1..prefix_length + seq - 1, 0..vocab])
}

/// Mean negative log-likelihood over mask-selected positions.
///
/// `targets` is [batch, seq] token ids, `loss_mask` is
/// [batch, seq] with 1.0 at supervised positions. Positions
/// holding the pad id (0) contribute nothing regardless of the
/// mask. Returns a scalar tensor; an all-zero mask yields zero
/// loss rather than a division by zero.
pub fn masked_cross_entropy<B: Backend>(
    logits:    Tensor<B, 3>,
    targets:   Tensor<B, 2, Int>,
    loss_mask: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let [batch, seq, _] = logits.dims();

    let log_probs = log_softmax(logits, 2);
    let nll = log_probs
        .gather(2, targets.clone().unsqueeze_dim::<3>(2))
        .reshape([batch, seq])
        .neg();

    let not_pad = targets.not_equal_elem(0).float();
    let mask = loss_mask * not_pad;

    let total = (nll * mask.clone()).sum();
    let count = mask.sum().clamp_min(1.0);
    total / count
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;

    type TestBackend = burn::backend::NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_shifted_logits_alignment() {
        // prefix_length 3, seq 4: rows 2..6 of 7 total
        let logits = Tensor::<TestBackend, 3>::random([2, 7, 5], Distribution::Default, &device());
        let expected = logits.clone().slice([0..2, 2..6, 0..5]);
        let shifted = shifted_logits(logits, 3);
        assert_eq!(shifted.dims(), [2, 4, 5]);
        let a: Vec<f32> = shifted.into_data().to_vec().unwrap();
        let b: Vec<f32> = expected.into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_uniform_logits_give_log_vocab() {
        let vocab = 8;
        let logits = Tensor::<TestBackend, 3>::zeros([1, 3, vocab], &device());
        let targets = Tensor::<TestBackend, 2, Int>::from_ints([[2, 5, 7]], &device());
        let mask = Tensor::<TestBackend, 2>::ones([1, 3], &device());
        let loss = masked_cross_entropy(logits, targets, mask).into_scalar();
        let expected = (vocab as f32).ln();
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_masked_positions_do_not_contribute() {
        let device = device();
        // position 1 has a wildly wrong target but is masked out
        let logits = Tensor::<TestBackend, 3>::from_floats(
            [[[10.0, 0.0, 0.0], [0.0, 0.0, 10.0], [0.0, 10.0, 0.0]]],
            &device,
        );
        let targets = Tensor::<TestBackend, 2, Int>::from_ints([[1, 1, 1]], &device);
        let full = Tensor::<TestBackend, 2>::from_floats([[1.0, 1.0, 1.0]], &device);
        let partial = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0, 1.0]], &device);

        let full_loss =
            masked_cross_entropy(logits.clone(), targets.clone(), full).into_scalar();
        let partial_loss = masked_cross_entropy(logits, targets, partial).into_scalar();
        // the remaining position predicts its target almost
        // perfectly, so the partial loss is near zero
        assert!(partial_loss < 0.01);
        assert!(full_loss > partial_loss);
    }

    #[test]
    fn test_pad_id_excluded_even_when_mask_set() {
        let logits = Tensor::<TestBackend, 3>::zeros([1, 2, 4], &device());
        let targets = Tensor::<TestBackend, 2, Int>::from_ints([[0, 3]], &device());
        let mask = Tensor::<TestBackend, 2>::ones([1, 2], &device());
        let loss = masked_cross_entropy(logits, targets, mask).into_scalar();
        // only the non-pad position counts: ln(4) not ln(4)/2 × 2
        assert!((loss - (4.0f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn test_all_zero_mask_yields_zero_loss() {
        let logits = Tensor::<TestBackend, 3>::zeros([1, 3, 4], &device());
        let targets = Tensor::<TestBackend, 2, Int>::from_ints([[1, 2, 3]], &device());
        let mask = Tensor::<TestBackend, 2>::zeros([1, 3], &device());
        let loss = masked_cross_entropy(logits, targets, mask).into_scalar();
        assert_eq!(loss, 0.0);
    }
}
