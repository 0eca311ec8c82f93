// ============================================================
// Layer 5 — Causal Language Model
// ============================================================
// A compact GPT-style decoder-only language model. The training
// pipeline only ever touches it through the two-method boundary
// below, so any causal LM with a token-embedding table could be
// swapped in:
//
//   embed_tokens(ids)                     → embedding vectors
//   forward_embeds(embeds, mask)          → next-token logits
//
// Crucially there is no token-id entry point for the combined
// sequence: the prefix reaches the model only as continuous
// embeddings, so gradients flow into the mapper and never try
// to update a discrete vocabulary entry.
//
// Built from Burn's own attention parts (MultiHeadAttention,
// generate_autoregressive_mask); no KV cache — decoding re-runs
// the full sequence each step.

use burn::{
    nn::{
        attention::{generate_autoregressive_mask, MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear,
        LinearConfig,
    },
    prelude::*,
    tensor::activation::gelu,
};

#[derive(Config, Debug)]
pub struct CausalLmConfig {
    pub vocab_size: usize,
    pub d_model: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub d_ff: usize,
    #[config(default = 1024)]
    pub max_positions: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
}

impl CausalLmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CausalLm<B> {
        let layers = (0..self.num_layers)
            .map(|_| self.build_block(device))
            .collect();
        CausalLm {
            token_embedding:    EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_positions, self.d_model).init(device),
            layers,
            final_norm: LayerNormConfig::new(self.d_model).init(device),
            lm_head: LinearConfig::new(self.d_model, self.vocab_size)
                .with_bias(false)
                .init(device),
            max_positions: self.max_positions,
            d_model:       self.d_model,
        }
    }

    fn build_block<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        DecoderBlock {
            norm1: LayerNormConfig::new(self.d_model).init(device),
            attn: MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
                .with_dropout(self.dropout)
                .init(device),
            norm2:       LayerNormConfig::new(self.d_model).init(device),
            ffn_linear1: LinearConfig::new(self.d_model, self.d_ff).init(device),
            ffn_linear2: LinearConfig::new(self.d_ff, self.d_model).init(device),
            dropout:     DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// One pre-norm decoder block: causal self-attention then GELU
/// feed-forward, each behind a residual connection.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub norm1:       LayerNorm<B>,
    pub attn:        MultiHeadAttention<B>,
    pub norm2:       LayerNorm<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> DecoderBlock<B> {
    fn forward(
        &self,
        x:           Tensor<B, 3>,
        causal_mask: Tensor<B, 3, Bool>,
        pad_mask:    Option<Tensor<B, 2, Bool>>,
    ) -> Tensor<B, 3> {
        let mut input = MhaInput::self_attn(self.norm1.forward(x.clone())).mask_attn(causal_mask);
        if let Some(pad) = pad_mask {
            input = input.mask_pad(pad);
        }
        let x = x + self.dropout.forward(self.attn.forward(input).context);
        let ffn = self
            .ffn_linear2
            .forward(gelu(self.ffn_linear1.forward(self.norm2.forward(x.clone()))));
        x + self.dropout.forward(ffn)
    }
}

#[derive(Module, Debug)]
pub struct CausalLm<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<DecoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub lm_head:            Linear<B>,
    pub max_positions:      usize,
    pub d_model:            usize,
}

impl<B: Backend> CausalLm<B> {
    /// Token-embedding lookup — the only way token ids enter the
    /// model.
    pub fn embed_tokens(&self, ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.token_embedding.forward(ids)
    }

    /// Run the decoder over a pre-built embedding sequence.
    /// `attention_mask` is [batch, seq] with 1 = real content;
    /// masked positions are hidden from every query.
    pub fn forward_embeds(
        &self,
        embeds:         Tensor<B, 3>,
        attention_mask: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 3> {
        let [batch, seq, _] = embeds.dims();
        assert!(
            seq <= self.max_positions,
            "sequence length {} exceeds max_positions {}",
            seq,
            self.max_positions
        );
        let device = embeds.device();

        let positions = Tensor::<B, 1, Int>::arange(0..seq as i64, &device)
            .unsqueeze::<2>()
            .expand([batch, seq]);
        let mut x = embeds + self.position_embedding.forward(positions);

        let causal = generate_autoregressive_mask::<B>(batch, seq, &device);
        let pad_mask = attention_mask.map(|m| m.lower_elem(0.5));

        for layer in &self.layers {
            x = layer.forward(x, causal.clone(), pad_mask.clone());
        }
        self.lm_head.forward(self.final_norm.forward(x))
    }

    pub fn embedding_dim(&self) -> usize {
        self.d_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;

    type TestBackend = burn::backend::NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn tiny_lm() -> CausalLm<TestBackend> {
        CausalLmConfig::new(50, 16, 2, 2, 32)
            .with_dropout(0.0)
            .init(&device())
    }

    #[test]
    fn test_forward_embeds_logit_shape() {
        let lm = tiny_lm();
        let ids = Tensor::<TestBackend, 2, Int>::from_ints([[1, 2, 3, 4]], &device());
        let embeds = lm.embed_tokens(ids);
        assert_eq!(embeds.dims(), [1, 4, 16]);
        let logits = lm.forward_embeds(embeds, None);
        assert_eq!(logits.dims(), [1, 4, 50]);
    }

    #[test]
    fn test_forward_respects_attention_mask_shape() {
        let lm = tiny_lm();
        let embeds = Tensor::<TestBackend, 3>::random([2, 6, 16], Distribution::Default, &device());
        let mask = Tensor::<TestBackend, 2>::from_floats(
            [[1.0, 1.0, 1.0, 0.0, 0.0, 0.0], [1.0, 1.0, 1.0, 1.0, 1.0, 1.0]],
            &device(),
        );
        let logits = lm.forward_embeds(embeds, Some(mask));
        assert_eq!(logits.dims(), [2, 6, 50]);
        let data: Vec<f32> = logits.into_data().to_vec().unwrap();
        assert!(data.iter().all(|v| v.is_finite()));
    }
}
