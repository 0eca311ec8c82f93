// ============================================================
// Layer 5 — Caption Model
// ============================================================
// The full conditioned model: mapper + causal LM glued at the
// embedding level.
//
//   forward(tokens, visual, mask):
//     token_embeds  = lm.embed_tokens(tokens)        [b, s, d]
//     prefix        = mapper(visual)                 [b, p, d]
//     combined      = cat(prefix, token_embeds)      [b, p+s, d]
//     logits        = lm.forward_embeds(combined)    [b, p+s, v]
//
// Logits cover the prefix positions too; the loss and the
// decoder slice out what they need.
//
// In prefix-only mode the language model is built with dropout
// zero and the optimizer receives gradients for the mapper
// alone — the LM parameters exist in the module tree but are
// never stepped.

use burn::prelude::*;

use crate::ml::{
    language_model::{CausalLm, CausalLmConfig},
    mapper::{MappingKind, PrefixMapper, PrefixMapperConfig},
};

#[derive(Config, Debug)]
pub struct CaptionModelConfig {
    pub mapping: MappingKind,
    /// Visual embedding width: 512 for ViT features, 640 for
    /// ResNet features
    pub prefix_dim: usize,
    pub prefix_length: usize,
    pub clip_length: usize,
    pub lm: CausalLmConfig,
    #[config(default = 8)]
    pub mapper_layers: usize,
    /// Freeze the language model and train the mapper only
    #[config(default = false)]
    pub only_prefix: bool,
}

impl CaptionModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CaptionModel<B> {
        // the loss slice starts at prefix_length - 1
        assert!(self.prefix_length > 0, "prefix_length must be at least 1");
        let mut lm_config = self.lm.clone();
        if self.only_prefix {
            // the LM never trains in this mode, so its dropout
            // must not perturb the mapper's learning signal
            lm_config.dropout = 0.0;
        }
        CaptionModel {
            mapper: PrefixMapperConfig::new(
                self.mapping,
                self.prefix_dim,
                self.lm.d_model,
                self.prefix_length,
                self.clip_length,
            )
            .with_num_layers(self.mapper_layers)
            .init(device),
            lm:            lm_config.init(device),
            prefix_length: self.prefix_length,
            only_prefix:   self.only_prefix,
        }
    }
}

#[derive(Module, Debug)]
pub struct CaptionModel<B: Backend> {
    pub lm:            CausalLm<B>,
    pub prefix_length: usize,
    pub only_prefix:   bool,
    // Field kept last: burn's `Module` derive binds each mapped field to a
    // local of the same name, and a field named `mapper` shadows the derive's
    // own `ModuleMapper` argument for any fields mapped after it.
    pub mapper:        PrefixMapper<B>,
}

impl<B: Backend> CaptionModel<B> {
    /// Full conditioned forward pass.
    ///
    /// `tokens` is [batch, seq], `visual` is [batch, prefix_dim],
    /// `attention_mask` (when given) is
    /// [batch, prefix_length + seq]. Returns logits of shape
    /// [batch, prefix_length + seq, vocab].
    pub fn forward(
        &self,
        tokens:         Tensor<B, 2, Int>,
        visual:         Tensor<B, 2>,
        attention_mask: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 3> {
        let token_embeds = self.lm.embed_tokens(tokens);
        let prefix = self.mapper.forward(visual);
        let combined = Tensor::cat(vec![prefix, token_embeds], 1);
        self.lm.forward_embeds(combined, attention_mask)
    }

    /// Prefix embeddings alone — the decoder seeds generation
    /// from these.
    pub fn prefix_embeds(&self, visual: Tensor<B, 2>) -> Tensor<B, 3> {
        self.mapper.forward(visual)
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

    fn tiny_config(mapping: MappingKind) -> CaptionModelConfig {
        CaptionModelConfig::new(
            mapping,
            64,
            10,
            10,
            CausalLmConfig::new(40, 16, 2, 2, 32).with_dropout(0.0),
        )
        .with_mapper_layers(2)
    }

    #[test]
    fn test_forward_covers_prefix_and_token_positions() {
        let model = tiny_config(MappingKind::Mlp).init::<TestBackend>(&device());
        let tokens = Tensor::<TestBackend, 2, Int>::from_ints([[3, 7, 9, 0, 0]], &device());
        let visual = Tensor::<TestBackend, 2>::random([1, 64], Distribution::Default, &device());
        let logits = model.forward(tokens, visual, None);
        // 10 prefix positions + 5 token positions
        assert_eq!(logits.dims(), [1, 15, 40]);
    }

    #[test]
    fn test_forward_with_transformer_mapper_and_mask() {
        let model = tiny_config(MappingKind::Transformer).init::<TestBackend>(&device());
        let tokens = Tensor::<TestBackend, 2, Int>::from_ints([[1, 2, 0], [4, 5, 6]], &device());
        let visual = Tensor::<TestBackend, 2>::random([2, 64], Distribution::Default, &device());
        let mask = Tensor::<TestBackend, 2>::ones([2, 13], &device());
        let logits = model.forward(tokens, visual, Some(mask));
        assert_eq!(logits.dims(), [2, 13, 40]);
    }

    #[test]
    #[should_panic(expected = "prefix_length must be at least 1")]
    fn test_zero_prefix_length_rejected() {
        CaptionModelConfig::new(
            MappingKind::Mlp,
            64,
            0,
            10,
            CausalLmConfig::new(40, 16, 2, 2, 32),
        )
        .init::<TestBackend>(&device());
    }

    #[test]
    fn test_only_prefix_zeroes_lm_dropout() {
        let mut config = tiny_config(MappingKind::Mlp);
        config.lm.dropout = 0.3;
        config.only_prefix = true;
        let model = config.init::<TestBackend>(&device());
        assert!(model.only_prefix);
    }
}
