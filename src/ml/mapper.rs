// ============================================================
// Layer 5 — Prefix Mapper
// ============================================================
// Maps one visual embedding (512 for ViT features, 640 for
// ResNet features) to `prefix_length` vectors in the language
// model's embedding space — the soft prompt.
//
// Two interchangeable strategies sit behind one enum:
//
//   Mlp         — a single feed-forward network mapping the
//                 visual vector straight to prefix_length × dim,
//                 reshaped into prefix_length vectors
//   Transformer — projects the visual vector to `clip_length`
//                 visual tokens, concatenates them with
//                 prefix_length LEARNED memory tokens, runs an
//                 attention stack over the concatenation, and
//                 returns only the memory-token outputs
//
// Decoupling clip_length (how many tokens carry the visual
// information) from prefix_length (how many prompt vectors the
// language model receives) lets the mapper compress or expand
// representational capacity.
//
// Output contract for both: (batch, prefix_length, embedding_dim).

use burn::{
    module::Param,
    nn::{Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::activation::tanh,
};

use crate::ml::attention::{MapperTransformerLayer, MapperTransformerLayerConfig};

/// Which mapper strategy to construct. A typed configuration
/// value — selected once at model construction, never re-read
/// from strings afterwards.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Mlp,
    Transformer,
}

// ─── MapperTransformer (the attention stack) ─────────────────────────────────

#[derive(Config, Debug)]
pub struct MapperTransformerConfig {
    pub dim_self: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    /// Key/value width for cross-attention layers; defaults to
    /// dim_self when absent
    pub dim_ref: Option<usize>,
    #[config(default = 2.0)]
    pub mlp_ratio: f64,
    /// Encoder-decoder style: even layers cross-attend into the
    /// reference sequence, odd layers self-attend (and the layer
    /// count is doubled so every pair survives)
    #[config(default = false)]
    pub enc_dec: bool,
}

impl MapperTransformerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MapperTransformer<B> {
        let dim_ref = self.dim_ref.unwrap_or(self.dim_self);
        let num_layers = if self.enc_dec { self.num_layers * 2 } else { self.num_layers };
        let layers = (0..num_layers)
            .map(|i| {
                let cross = self.enc_dec && i % 2 == 0;
                let layer_ref = if cross { dim_ref } else if self.enc_dec { self.dim_self } else { dim_ref };
                MapperTransformerLayerConfig::new(self.dim_self, layer_ref, self.num_heads)
                    .with_mlp_ratio(self.mlp_ratio)
                    .init(device)
            })
            .collect();
        MapperTransformer { layers, enc_dec: self.enc_dec }
    }
}

/// A stack of pre-norm residual layers, optionally alternating
/// cross/self attention in encoder-decoder style.
#[derive(Module, Debug)]
pub struct MapperTransformer<B: Backend> {
    pub layers:  Vec<MapperTransformerLayer<B>>,
    pub enc_dec: bool,
}

impl<B: Backend> MapperTransformer<B> {
    /// Which reference sequence and mask a given layer sees. In
    /// encoder-decoder mode even layers cross-attend (queries
    /// from the running stream, keys and values from the
    /// reference sequence, no mask) and odd layers self-attend
    /// under the mask; a plain stack passes both through.
    fn layer_inputs(
        &self,
        index: usize,
        y:     &Option<Tensor<B, 3>>,
        mask:  &Option<Tensor<B, 2>>,
    ) -> (Option<Tensor<B, 3>>, Option<Tensor<B, 2>>) {
        if self.enc_dec && index % 2 == 0 {
            (y.clone(), None)
        } else if self.enc_dec {
            (None, mask.clone())
        } else {
            (y.clone(), mask.clone())
        }
    }

    pub fn forward(
        &self,
        x:    Tensor<B, 3>,
        y:    Option<Tensor<B, 3>>,
        mask: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 3> {
        let mut x = x;
        for (i, layer) in self.layers.iter().enumerate() {
            let (layer_y, layer_mask) = self.layer_inputs(i, &y, &mask);
            x = layer.forward(x, layer_y, layer_mask);
        }
        x
    }

    /// Forward that also returns each layer's attention weights.
    /// Routes each layer exactly like `forward`, so the output
    /// tensor is the same.
    pub fn forward_with_weights(
        &self,
        x:    Tensor<B, 3>,
        y:    Option<Tensor<B, 3>>,
        mask: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 3>, Vec<Tensor<B, 4>>) {
        let mut x = x;
        let mut attentions = Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.iter().enumerate() {
            let (layer_y, layer_mask) = self.layer_inputs(i, &y, &mask);
            let (next, weights) = layer.forward_with_weights(x, layer_y, layer_mask);
            x = next;
            attentions.push(weights);
        }
        (x, attentions)
    }
}

// ─── MLP variant ─────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct MlpMapperConfig {
    pub prefix_dim: usize,
    pub embedding_dim: usize,
    pub prefix_length: usize,
}

impl MlpMapperConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MlpMapper<B> {
        let out = self.embedding_dim * self.prefix_length;
        MlpMapper {
            fc1:           LinearConfig::new(self.prefix_dim, out / 2).init(device),
            fc2:           LinearConfig::new(out / 2, out).init(device),
            prefix_length: self.prefix_length,
            embedding_dim: self.embedding_dim,
        }
    }
}

/// Feed-forward mapper: visual vector → prefix_length × dim in
/// one shot, tanh between the two projections.
#[derive(Module, Debug)]
pub struct MlpMapper<B: Backend> {
    pub fc1:           Linear<B>,
    pub fc2:           Linear<B>,
    pub prefix_length: usize,
    pub embedding_dim: usize,
}

impl<B: Backend> MlpMapper<B> {
    pub fn forward(&self, visual: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, _] = visual.dims();
        let x = self.fc2.forward(tanh(self.fc1.forward(visual)));
        x.reshape([batch, self.prefix_length, self.embedding_dim])
    }
}

// ─── Transformer variant ─────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct TransformerMapperConfig {
    pub prefix_dim: usize,
    pub embedding_dim: usize,
    pub prefix_length: usize,
    pub clip_length: usize,
    #[config(default = 8)]
    pub num_layers: usize,
    #[config(default = 8)]
    pub num_heads: usize,
}

impl TransformerMapperConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransformerMapper<B> {
        TransformerMapper {
            linear: LinearConfig::new(self.prefix_dim, self.clip_length * self.embedding_dim)
                .init(device),
            memory: Initializer::Normal { mean: 0.0, std: 1.0 }
                .init([self.prefix_length, self.embedding_dim], device),
            transformer: MapperTransformerConfig::new(
                self.embedding_dim,
                self.num_heads,
                self.num_layers,
            )
            .init(device),
            prefix_length: self.prefix_length,
            clip_length:   self.clip_length,
            embedding_dim: self.embedding_dim,
        }
    }
}

/// Attention mapper: visual tokens + learned memory tokens run
/// through the stack together; only the memory-token outputs
/// become the prefix (the visual tokens are scratch space).
#[derive(Module, Debug)]
pub struct TransformerMapper<B: Backend> {
    pub linear:        Linear<B>,
    /// prefix_length × embedding_dim learned constants,
    /// independent of the input
    pub memory:        Param<Tensor<B, 2>>,
    pub transformer:   MapperTransformer<B>,
    pub prefix_length: usize,
    pub clip_length:   usize,
    pub embedding_dim: usize,
}

impl<B: Backend> TransformerMapper<B> {
    pub fn forward(&self, visual: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, _] = visual.dims();
        let visual_tokens = self
            .linear
            .forward(visual)
            .reshape([batch, self.clip_length, self.embedding_dim]);
        let memory = self
            .memory
            .val()
            .unsqueeze::<3>()
            .expand([batch, self.prefix_length, self.embedding_dim]);
        let joined = Tensor::cat(vec![visual_tokens, memory], 1);
        let out = self.transformer.forward(joined, None, None);
        out.slice([
            0..batch,
            self.clip_length..self.clip_length + self.prefix_length,
        ])
    }
}

// ─── The strategy enum ───────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct PrefixMapperConfig {
    pub mapping: MappingKind,
    pub prefix_dim: usize,
    pub embedding_dim: usize,
    pub prefix_length: usize,
    pub clip_length: usize,
    #[config(default = 8)]
    pub num_layers: usize,
}

impl PrefixMapperConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PrefixMapper<B> {
        match self.mapping {
            MappingKind::Mlp => PrefixMapper::Mlp(
                MlpMapperConfig::new(self.prefix_dim, self.embedding_dim, self.prefix_length)
                    .init(device),
            ),
            MappingKind::Transformer => PrefixMapper::Transformer(
                TransformerMapperConfig::new(
                    self.prefix_dim,
                    self.embedding_dim,
                    self.prefix_length,
                    self.clip_length,
                )
                .with_num_layers(self.num_layers)
                .init(device),
            ),
        }
    }
}

/// The sole trainable component in prefix-only fine-tuning.
#[derive(Module, Debug)]
pub enum PrefixMapper<B: Backend> {
    Mlp(MlpMapper<B>),
    Transformer(TransformerMapper<B>),
}

impl<B: Backend> PrefixMapper<B> {
    /// Always exactly prefix_length vectors of embedding_dim
    /// width, regardless of variant.
    pub fn forward(&self, visual: Tensor<B, 2>) -> Tensor<B, 3> {
        match self {
            PrefixMapper::Mlp(m) => m.forward(visual),
            PrefixMapper::Transformer(m) => m.forward(visual),
        }
    }
}
