// ============================================================
// Layer 5 — Batched Greedy Decoder
// ============================================================
// Autoregressive generation for a whole batch at once. Every
// sequence carries a two-state machine:
//
//   RUNNING — tokens still being appended, length still growing
//   STOPPED — produced the stop token or EOS; stays in lockstep
//             with the batch but its transcript is frozen
//
// STOPPED is irreversible. The step loop exits early once every
// sequence has stopped, otherwise it runs to `entry_length`.
// Stopped rows keep receiving the embeddings of whatever they
// emit (the tensors must stay rectangular); those tail tokens
// are simply never part of the decoded text.

use anyhow::{anyhow, Result};
use burn::prelude::*;
use tokenizers::Tokenizer;

use crate::ml::language_model::CausalLm;

/// Host-side bookkeeping for the batch: which rows are live and
/// how many tokens each accepted before stopping.
#[derive(Debug)]
pub struct DecodeState {
    pub lengths: Vec<usize>,
    pub stopped: Vec<bool>,
}

impl DecodeState {
    pub fn new(batch_size: usize) -> Self {
        Self {
            lengths: vec![0; batch_size],
            stopped: vec![false; batch_size],
        }
    }

    /// Record one decoding step. Running rows grow by one token
    /// (the stop token itself is counted, so punctuation survives
    /// into the transcript); rows that just emitted the stop or
    /// EOS token transition to STOPPED. Returns true when the
    /// whole batch has stopped.
    pub fn advance(&mut self, chosen: &[i64], stop_token: u32, eos_token: u32) -> bool {
        for (i, &token) in chosen.iter().enumerate() {
            if self.stopped[i] {
                continue;
            }
            self.lengths[i] += 1;
            if token == i64::from(stop_token) || token == i64::from(eos_token) {
                self.stopped[i] = true;
            }
        }
        self.all_stopped()
    }

    pub fn all_stopped(&self) -> bool {
        self.stopped.iter().all(|&s| s)
    }

    pub fn is_running(&self, index: usize) -> bool {
        !self.stopped[index]
    }
}

/// Greedy decoder configuration. Temperature only rescales the
/// logits; with argmax selection it exists for parity with
/// sampling setups and is skipped when non-positive.
#[derive(Config, Debug)]
pub struct BatchDecoderConfig {
    pub stop_token_id: u32,
    pub eos_token_id: u32,
    #[config(default = 67)]
    pub entry_length: usize,
    #[config(default = 1.0)]
    pub temperature: f64,
}

impl BatchDecoderConfig {
    pub fn init(&self) -> BatchDecoder {
        BatchDecoder {
            stop_token_id: self.stop_token_id,
            eos_token_id:  self.eos_token_id,
            entry_length:  self.entry_length,
            temperature:   self.temperature,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchDecoder {
    pub stop_token_id: u32,
    pub eos_token_id:  u32,
    pub entry_length:  usize,
    pub temperature:   f64,
}

impl BatchDecoder {
    /// Generate one string per row, seeded from a context of
    /// embedding vectors (prefix alone for captioning, prefix
    /// plus question for answering).
    ///
    /// `mask`, when present, must cover the context width; it is
    /// extended with a ones column per generated token.
    pub fn generate<B: Backend>(
        &self,
        lm:        &CausalLm<B>,
        context:   Tensor<B, 3>,
        mask:      Option<Tensor<B, 2>>,
        tokenizer: &Tokenizer,
    ) -> Result<Vec<String>> {
        let generated = self.generate_tokens(lm, context, mask)?;
        generated
            .iter()
            .map(|ids| {
                tokenizer
                    .decode(ids, true)
                    .map_err(|e| anyhow!("decode failed: {e}"))
            })
            .collect()
    }

    /// The raw token loop behind `generate`. Every row holds at
    /// most `entry_length` tokens; a row that never emits the
    /// stop or EOS token holds exactly `entry_length`.
    pub fn generate_tokens<B: Backend>(
        &self,
        lm:      &CausalLm<B>,
        context: Tensor<B, 3>,
        mask:    Option<Tensor<B, 2>>,
    ) -> Result<Vec<Vec<u32>>> {
        let [batch, _, _] = context.dims();
        let device = context.device();

        let mut embeds = context;
        let mut mask = mask;
        let mut state = DecodeState::new(batch);
        let mut generated: Vec<Vec<u32>> = vec![Vec::new(); batch];

        for _ in 0..self.entry_length {
            let logits = lm.forward_embeds(embeds.clone(), mask.clone());
            let [_, total, vocab] = logits.dims();
            let mut last = logits
                .slice([0..batch, total - 1..total, 0..vocab])
                .reshape([batch, vocab]);
            if self.temperature > 0.0 {
                last = last.div_scalar(self.temperature);
            }

            let chosen_tensor = last.argmax(1);
            let chosen: Vec<i64> = chosen_tensor
                .clone()
                .into_data()
                .convert::<i64>()
                .to_vec()
                .map_err(|e| anyhow!("failed to read chosen tokens: {e:?}"))?;

            for (i, &token) in chosen.iter().enumerate() {
                if state.is_running(i) {
                    generated[i].push(token as u32);
                }
            }
            let done = state.advance(&chosen, self.stop_token_id, self.eos_token_id);

            let next_embeds = lm.embed_tokens(chosen_tensor);
            embeds = Tensor::cat(vec![embeds, next_embeds], 1);
            mask = mask.map(|m| {
                Tensor::cat(vec![m, Tensor::<B, 2>::ones([batch, 1], &device)], 1)
            });

            if done {
                break;
            }
        }

        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;

    use crate::infra::tokenizer_store::build_word_level;
    use crate::ml::language_model::CausalLmConfig;

    type TestBackend = burn::backend::NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_stopped_length_is_frozen() {
        let mut state = DecodeState::new(3);
        // row 1 emits the stop token on the first step
        state.advance(&[4, 9, 4], 9, 10);
        assert_eq!(state.lengths, vec![1, 1, 1]);
        assert!(!state.all_stopped());

        state.advance(&[4, 4, 4], 9, 10);
        state.advance(&[4, 4, 10], 9, 10);
        assert_eq!(state.lengths, vec![3, 1, 3]);
        assert_eq!(state.stopped, vec![false, true, true]);
    }

    #[test]
    fn test_stop_is_irreversible() {
        let mut state = DecodeState::new(1);
        assert!(state.advance(&[7], 7, 8));
        // later non-stop tokens must not resurrect the row
        assert!(state.advance(&[3], 7, 8));
        assert_eq!(state.lengths, vec![1]);
        assert!(state.stopped[0]);
    }

    #[test]
    fn test_eos_also_stops() {
        let mut state = DecodeState::new(2);
        let done = state.advance(&[8, 8], 7, 8);
        assert!(done);
    }

    #[test]
    fn test_generate_returns_one_string_per_row() {
        let tokenizer = build_word_level(&["a", "man", "rides", "a", "horse"]).unwrap();
        let vocab = tokenizer.get_vocab_size(true) as usize;
        let lm = CausalLmConfig::new(vocab, 16, 2, 1, 32)
            .with_dropout(0.0)
            .init::<TestBackend>(&device());
        let context =
            Tensor::<TestBackend, 3>::random([2, 4, 16], Distribution::Default, &device());

        let decoder = BatchDecoderConfig::new(0, 0).with_entry_length(5).init();
        let out = decoder.generate(&lm, context, None, &tokenizer).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_generate_grows_mask_alongside_tokens() {
        let tokenizer = build_word_level(&["blue", "sky"]).unwrap();
        let vocab = tokenizer.get_vocab_size(true) as usize;
        let lm = CausalLmConfig::new(vocab, 16, 2, 1, 32)
            .with_dropout(0.0)
            .init::<TestBackend>(&device());
        let context =
            Tensor::<TestBackend, 3>::random([1, 3, 16], Distribution::Default, &device());
        let mask = Tensor::<TestBackend, 2>::ones([1, 3], &device());

        let decoder = BatchDecoderConfig::new(0, 0).with_entry_length(4).init();
        let out = decoder.generate(&lm, context, Some(mask), &tokenizer).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_unreachable_stop_runs_to_entry_length() {
        let vocab = 12;
        let lm = CausalLmConfig::new(vocab, 16, 2, 1, 32)
            .with_dropout(0.0)
            .init::<TestBackend>(&device());
        let context =
            Tensor::<TestBackend, 3>::random([3, 2, 16], Distribution::Default, &device());

        // stop ids outside the vocabulary can never be emitted,
        // so every row must run to the cap and no further
        let decoder = BatchDecoderConfig::new(vocab as u32, vocab as u32 + 1)
            .with_entry_length(6)
            .init();
        let rows = decoder.generate_tokens(&lm, context, None).unwrap();
        assert_eq!(rows.len(), 3);
        for ids in &rows {
            assert_eq!(ids.len(), 6);
        }
    }
}
