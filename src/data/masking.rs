// ============================================================
// Layer 4 — Supervision Mask Builder
// ============================================================
// Turns one tokenized record into the padded token sequence and
// the two per-position masks the model consumes:
//
//   attention mask — which positions the language model may
//                    attend to (prefix + real text, never padding)
//   loss mask      — which positions are scored by the training
//                    objective
//
// For captioning the two masks agree. For question answering
// they differ: the model must SEE the question (attention 1)
// but is only SCORED on the answer span (loss 1 over the answer
// and its trailing end-of-sequence marker, 0 over the question).
//
// Padding flow: tokens are first padded with a -1 sentinel so
// that "padding" stays distinguishable from genuine token id 0.
// The boolean text mask is derived from the sentinel, and only
// then are sentinel positions rewritten to 0 — token id 0
// doubles as the loss's ignore id, so padding never contributes
// gradient.
//
// Both masks are prefixed with `prefix_length` ones: the soft
// prompt is always visible and never scored directly (scoring
// is restricted downstream by the loss-mask text region).

use crate::domain::policy::OverflowPolicy;

/// Sentinel marking "no token here" before the final masks are
/// derived. Replaced by 0 once the masks are captured.
const PAD_SENTINEL: i64 = -1;

/// One fully masked example, ready for batching.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedExample {
    /// Token ids, length `max_seq_len`, padding rewritten to 0
    pub tokens: Vec<u32>,

    /// Length `prefix_length + max_seq_len`; 1 = may attend
    pub attention_mask: Vec<f32>,

    /// Length `prefix_length + max_seq_len`; 1 = scored by loss
    pub loss_mask: Vec<f32>,
}

/// Builds (tokens, attention mask, loss mask) triples under the
/// task-specific masking rules. One builder per dataset; both
/// lengths are frozen at dataset build time.
#[derive(Debug, Clone, Copy)]
pub struct SupervisionMaskBuilder {
    pub prefix_length: usize,
    pub max_seq_len:   usize,
}

impl SupervisionMaskBuilder {
    pub fn new(prefix_length: usize, max_seq_len: usize) -> Self {
        Self { prefix_length, max_seq_len }
    }

    /// Pad (with the sentinel) or truncate to `max_seq_len`,
    /// keeping the first `max_seq_len` tokens on truncation.
    fn pad_or_truncate(&self, token_ids: &[u32]) -> Vec<i64> {
        let mut padded: Vec<i64> = token_ids.iter().map(|&t| t as i64).collect();
        padded.truncate(self.max_seq_len);
        while padded.len() < self.max_seq_len {
            padded.push(PAD_SENTINEL);
        }
        padded
    }

    /// Derive the text-region mask from the sentinel, then
    /// rewrite sentinel positions to token id 0.
    fn finalize_tokens(padded: Vec<i64>) -> (Vec<u32>, Vec<f32>) {
        let text_mask: Vec<f32> = padded
            .iter()
            .map(|&t| if t >= 0 { 1.0 } else { 0.0 })
            .collect();
        let tokens: Vec<u32> = padded.iter().map(|&t| t.max(0) as u32).collect();
        (tokens, text_mask)
    }

    /// Prepend the always-on prefix block to a text-region mask.
    fn with_prefix(&self, text_mask: Vec<f32>) -> Vec<f32> {
        let mut mask = vec![1.0; self.prefix_length];
        mask.extend(text_mask);
        mask
    }

    /// Captioning rule: attention mask == loss mask == 1 at real
    /// token positions, 0 at padding, prefixed with ones.
    pub fn caption_example(&self, token_ids: &[u32]) -> MaskedExample {
        let padded = self.pad_or_truncate(token_ids);
        let (tokens, text_mask) = Self::finalize_tokens(padded);
        let attention_mask = self.with_prefix(text_mask.clone());
        let loss_mask = self.with_prefix(text_mask);
        MaskedExample { tokens, attention_mask, loss_mask }
    }

    /// Question-answering rule.
    ///
    /// `token_ids` is the tokenization of "question answer" with
    /// the end-of-sequence marker already appended; `q_len` and
    /// `a_len` are the separately measured token counts (`a_len`
    /// includes the end marker).
    ///
    /// Returns None when the pair overflows capacity and the
    /// policy says to drop it.
    pub fn qa_example(
        &self,
        token_ids: &[u32],
        q_len:     usize,
        a_len:     usize,
        overflow:  OverflowPolicy,
    ) -> Option<MaskedExample> {
        let fits = q_len + a_len <= self.max_seq_len;
        if !fits && overflow == OverflowPolicy::Drop {
            return None;
        }

        let (loss_text, attn_text): (Vec<f32>, Vec<f32>) = if fits {
            let rest_len = self.max_seq_len - q_len - a_len;
            let mut loss = vec![0.0; q_len];
            loss.extend(vec![1.0; a_len]);
            loss.extend(vec![0.0; rest_len]);
            let mut attn = vec![1.0; q_len + a_len];
            attn.extend(vec![0.0; rest_len]);
            (loss, attn)
        } else {
            // Overflow with ZeroSupervision: the example stays in
            // the dataset but supervises nothing and attends to
            // nothing beyond the prefix.
            (vec![0.0; self.max_seq_len], vec![0.0; self.max_seq_len])
        };

        let padded = self.pad_or_truncate(token_ids);
        let (tokens, _) = Self::finalize_tokens(padded);
        Some(MaskedExample {
            tokens,
            attention_mask: self.with_prefix(attn_text),
            loss_mask:      self.with_prefix(loss_text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: usize = 4;
    const MAX_SEQ: usize = 10;

    fn builder() -> SupervisionMaskBuilder {
        SupervisionMaskBuilder::new(PREFIX, MAX_SEQ)
    }

    #[test]
    fn test_caption_masks_have_invariant_length() {
        let ex = builder().caption_example(&[5, 6, 7]);
        assert_eq!(ex.tokens.len(), MAX_SEQ);
        assert_eq!(ex.attention_mask.len(), PREFIX + MAX_SEQ);
        assert_eq!(ex.loss_mask.len(), PREFIX + MAX_SEQ);
    }

    #[test]
    fn test_caption_attention_equals_loss() {
        let ex = builder().caption_example(&[5, 6, 7]);
        assert_eq!(ex.attention_mask, ex.loss_mask);
        // 4 prefix ones + 3 token ones + 7 padding zeros
        let expected: Vec<f32> = [vec![1.0; 7], vec![0.0; 7]].concat();
        assert_eq!(ex.attention_mask, expected);
    }

    #[test]
    fn test_caption_padding_is_rewritten_to_zero() {
        let ex = builder().caption_example(&[5, 6, 7]);
        assert_eq!(&ex.tokens[..3], &[5, 6, 7]);
        assert!(ex.tokens[3..].iter().all(|&t| t == 0));
    }

    #[test]
    fn test_caption_truncation_keeps_first_tokens() {
        let ids: Vec<u32> = (1..=15).collect();
        let ex = builder().caption_example(&ids);
        assert_eq!(ex.tokens, (1..=10).collect::<Vec<u32>>());
        assert!(ex.attention_mask.iter().all(|&m| m == 1.0));
    }

    #[test]
    fn test_qa_loss_mask_covers_exactly_the_answer() {
        // question = 3 tokens, answer = 2 tokens + eos = 3
        let ids = [10, 11, 12, 20, 21, 99];
        let ex = builder()
            .qa_example(&ids, 3, 3, OverflowPolicy::ZeroSupervision)
            .unwrap();

        let loss_text = &ex.loss_mask[PREFIX..];
        let answer_supervised: f32 = loss_text.iter().sum();
        assert_eq!(answer_supervised, 3.0);
        // contiguous block right after a q_len-long zero block
        assert_eq!(&loss_text[..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&loss_text[3..6], &[1.0, 1.0, 1.0]);
        assert!(loss_text[6..].iter().all(|&m| m == 0.0));

        // attention sees question AND answer
        let attn_text = &ex.attention_mask[PREFIX..];
        assert_eq!(&attn_text[..6], &[1.0; 6]);
        assert!(attn_text[6..].iter().all(|&m| m == 0.0));
    }

    #[test]
    fn test_qa_prefix_block_is_always_on() {
        let ex = builder()
            .qa_example(&[10, 11, 20, 99], 2, 2, OverflowPolicy::ZeroSupervision)
            .unwrap();
        assert_eq!(&ex.attention_mask[..PREFIX], &[1.0; PREFIX]);
        assert_eq!(&ex.loss_mask[..PREFIX], &[1.0; PREFIX]);
    }

    #[test]
    fn test_qa_overflow_zeroes_both_masks() {
        // q_len + a_len = 12 > max_seq_len = 10
        let ids: Vec<u32> = (1..=12).collect();
        let ex = builder()
            .qa_example(&ids, 7, 5, OverflowPolicy::ZeroSupervision)
            .unwrap();
        assert!(ex.loss_mask[PREFIX..].iter().all(|&m| m == 0.0));
        assert!(ex.attention_mask[PREFIX..].iter().all(|&m| m == 0.0));
        // prefix block still attends
        assert_eq!(&ex.attention_mask[..PREFIX], &[1.0; PREFIX]);
    }

    #[test]
    fn test_qa_overflow_drop_policy_excludes_example() {
        let ids: Vec<u32> = (1..=12).collect();
        assert!(builder().qa_example(&ids, 7, 5, OverflowPolicy::Drop).is_none());
    }

    #[test]
    fn test_qa_exact_fit_has_no_padding_region() {
        // q_len + a_len == max_seq_len
        let ids: Vec<u32> = (1..=10).collect();
        let ex = builder()
            .qa_example(&ids, 6, 4, OverflowPolicy::Drop)
            .unwrap();
        assert!(ex.attention_mask.iter().all(|&m| m == 1.0));
        assert_eq!(ex.loss_mask[PREFIX..].iter().sum::<f32>(), 4.0);
    }
}
