// ============================================================
// Layer 5 — Mapper Attention Blocks
// ============================================================
// The building blocks of the prefix mapper: scaled dot-product
// multi-head attention over two (possibly distinct) sequences,
// a position-wise feed-forward block, and the pre-norm residual
// layer that combines them.
//
// The query source `x` and the key/value source `y` may have
// different channel widths (dim_self vs dim_ref) — that is what
// lets memory tokens cross-attend into visual tokens.
//
// Masking is additive: masked-out key positions receive a large
// negative bias before the softmax instead of -inf, so a fully
// masked key set degrades to a uniform distribution rather than
// propagating NaN.

use burn::{
    nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{relu, softmax},
};

/// Magnitude of the additive bias applied to masked-out key
/// positions. Large enough to zero their softmax weight next to
/// any real score, small enough to stay finite in f32.
const MASK_BIAS: f64 = 1.0e9;

// ─── AttentionBlock ──────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct AttentionBlockConfig {
    /// Channel width of the query source (and of the output)
    pub dim_self: usize,
    /// Channel width of the key/value source
    pub dim_ref: usize,
    /// Number of attention heads; must divide dim_self evenly
    pub num_heads: usize,
    #[config(default = true)]
    pub bias: bool,
}

impl AttentionBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttentionBlock<B> {
        // Head-dimension mismatch is a configuration error; it can
        // never be recovered at runtime.
        assert_eq!(
            self.dim_self % self.num_heads,
            0,
            "dim_self ({}) must be divisible by num_heads ({})",
            self.dim_self,
            self.num_heads
        );
        let head_dim = self.dim_self / self.num_heads;
        AttentionBlock {
            to_queries: LinearConfig::new(self.dim_self, self.dim_self)
                .with_bias(self.bias)
                .init(device),
            to_keys_values: LinearConfig::new(self.dim_ref, self.dim_self * 2)
                .with_bias(self.bias)
                .init(device),
            project: LinearConfig::new(self.dim_self, self.dim_self).init(device),
            num_heads: self.num_heads,
            scale: (head_dim as f64).powf(-0.5),
        }
    }
}

/// Multi-head scaled dot-product attention. Keys and values come
/// from a single fused projection of `y`.
#[derive(Module, Debug)]
pub struct AttentionBlock<B: Backend> {
    pub to_queries:     Linear<B>,
    pub to_keys_values: Linear<B>,
    pub project:        Linear<B>,
    pub num_heads:      usize,
    pub scale:          f64,
}

impl<B: Backend> AttentionBlock<B> {
    /// Attend `x` over `y` (self-attention when `y` is None).
    /// `mask` has shape [batch, seq_kv]; 1 = may attend, 0 = hide.
    ///
    /// Returns the attended output [batch, seq_q, dim_self] and
    /// the attention weights [batch, heads, seq_q, seq_kv].
    pub fn forward_with_weights(
        &self,
        x:    Tensor<B, 3>,
        y:    Option<Tensor<B, 3>>,
        mask: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 3>, Tensor<B, 4>) {
        let y = y.unwrap_or_else(|| x.clone());
        let [b, n, c] = x.dims();
        let [_, m, _] = y.dims();
        let h = self.num_heads;
        let head_dim = c / h;

        // [b, n, c] → [b, h, n, dh]
        let queries = self
            .to_queries
            .forward(x)
            .reshape([b, n, h, head_dim])
            .swap_dims(1, 2);

        // fused K/V projection: [b, m, 2, h, dh]
        let keys_values = self.to_keys_values.forward(y).reshape([b, m, 2, h, head_dim]);
        let keys = keys_values
            .clone()
            .slice([0..b, 0..m, 0..1])
            .reshape([b, m, h, head_dim])
            .swap_dims(1, 2);
        let values = keys_values
            .slice([0..b, 0..m, 1..2])
            .reshape([b, m, h, head_dim])
            .swap_dims(1, 2);

        // [b, h, n, m]
        let mut scores = queries.matmul(keys.transpose()).mul_scalar(self.scale);

        if let Some(mask) = mask {
            // [b, m] → [b, 1, 1, m], broadcast across heads and queries
            let bias = mask
                .unsqueeze_dim::<3>(1)
                .unsqueeze_dim::<4>(1)
                .sub_scalar(1.0)
                .mul_scalar(MASK_BIAS);
            scores = scores + bias;
        }

        let weights = softmax(scores, 3);
        let out = weights
            .clone()
            .matmul(values)
            .swap_dims(1, 2)
            .reshape([b, n, c]);
        (self.project.forward(out), weights)
    }

    pub fn forward(
        &self,
        x:    Tensor<B, 3>,
        y:    Option<Tensor<B, 3>>,
        mask: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 3> {
        self.forward_with_weights(x, y, mask).0
    }
}

// ─── FeedForwardBlock ────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct FeedForwardBlockConfig {
    pub dim: usize,
    pub hidden_dim: usize,
    #[config(default = 0.0)]
    pub dropout: f64,
}

impl FeedForwardBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeedForwardBlock<B> {
        FeedForwardBlock {
            fc1:     LinearConfig::new(self.dim, self.hidden_dim).init(device),
            fc2:     LinearConfig::new(self.hidden_dim, self.dim).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Two-layer position-wise projection with ReLU.
#[derive(Module, Debug)]
pub struct FeedForwardBlock<B: Backend> {
    pub fc1:     Linear<B>,
    pub fc2:     Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> FeedForwardBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.dropout.forward(relu(self.fc1.forward(x)));
        self.dropout.forward(self.fc2.forward(x))
    }
}

// ─── MapperTransformerLayer ──────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct MapperTransformerLayerConfig {
    pub dim_self: usize,
    pub dim_ref: usize,
    pub num_heads: usize,
    #[config(default = 2.0)]
    pub mlp_ratio: f64,
    #[config(default = 0.0)]
    pub dropout: f64,
}

impl MapperTransformerLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MapperTransformerLayer<B> {
        let hidden = (self.dim_self as f64 * self.mlp_ratio) as usize;
        MapperTransformerLayer {
            norm1: LayerNormConfig::new(self.dim_self).init(device),
            attn: AttentionBlockConfig::new(self.dim_self, self.dim_ref, self.num_heads)
                .with_bias(false)
                .init(device),
            norm2: LayerNormConfig::new(self.dim_self).init(device),
            ffn: FeedForwardBlockConfig::new(self.dim_self, hidden)
                .with_dropout(self.dropout)
                .init(device),
        }
    }
}

/// One pre-norm residual block:
///   x'  = x  + Attention(Norm(x), y, mask)
///   x'' = x' + FeedForward(Norm(x'))
/// Configurable as self-attention (y = None) or cross-attention.
#[derive(Module, Debug)]
pub struct MapperTransformerLayer<B: Backend> {
    pub norm1: LayerNorm<B>,
    pub attn:  AttentionBlock<B>,
    pub norm2: LayerNorm<B>,
    pub ffn:   FeedForwardBlock<B>,
}

impl<B: Backend> MapperTransformerLayer<B> {
    pub fn forward(
        &self,
        x:    Tensor<B, 3>,
        y:    Option<Tensor<B, 3>>,
        mask: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 3> {
        self.forward_with_weights(x, y, mask).0
    }

    /// Same as `forward` but also returns the attention weights
    /// for diagnostics.
    pub fn forward_with_weights(
        &self,
        x:    Tensor<B, 3>,
        y:    Option<Tensor<B, 3>>,
        mask: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 3>, Tensor<B, 4>) {
        let (attended, weights) =
            self.attn
                .forward_with_weights(self.norm1.forward(x.clone()), y, mask);
        let x = x + attended;
        let out = x.clone() + self.ffn.forward(self.norm2.forward(x));
        (out, weights)
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

    #[test]
    #[should_panic(expected = "divisible")]
    fn test_head_mismatch_is_a_construction_error() {
        let _ = AttentionBlockConfig::new(10, 10, 3).init::<TestBackend>(&device());
    }

    #[test]
    fn test_self_attention_output_shape() {
        let block = AttentionBlockConfig::new(16, 16, 4).init::<TestBackend>(&device());
        let x = Tensor::<TestBackend, 3>::random([2, 5, 16], Distribution::Default, &device());
        let out = block.forward(x, None, None);
        assert_eq!(out.dims(), [2, 5, 16]);
    }

    #[test]
    fn test_cross_attention_output_shape() {
        let block = AttentionBlockConfig::new(16, 8, 4).init::<TestBackend>(&device());
        let x = Tensor::<TestBackend, 3>::random([2, 3, 16], Distribution::Default, &device());
        let y = Tensor::<TestBackend, 3>::random([2, 7, 8], Distribution::Default, &device());
        let (out, weights) = block.forward_with_weights(x, Some(y), None);
        assert_eq!(out.dims(), [2, 3, 16]);
        assert_eq!(weights.dims(), [2, 4, 3, 7]);
    }

    #[test]
    fn test_single_visible_key_dominates() {
        // Mask out all but key position 2: every query must land
        // its full attention weight there, so every query row of
        // the output is identical.
        let block = AttentionBlockConfig::new(8, 8, 2).init::<TestBackend>(&device());
        let x = Tensor::<TestBackend, 3>::random([1, 4, 8], Distribution::Default, &device());
        let mask = Tensor::<TestBackend, 1>::from_floats(
            [0.0, 0.0, 1.0, 0.0, 0.0].as_slice(),
            &device(),
        )
        .reshape([1, 5]);
        let y = Tensor::<TestBackend, 3>::random([1, 5, 8], Distribution::Default, &device());

        let (out, weights) = block.forward_with_weights(x, Some(y), Some(mask));
        let w: Vec<f32> = weights.into_data().to_vec().unwrap();
        // weights laid out [b, h, n, m]: position 2 of every key
        // row carries weight ~1
        for row in w.chunks(5) {
            assert!((row[2] - 1.0).abs() < 1e-5);
        }
        let o: Vec<f32> = out.into_data().to_vec().unwrap();
        let (first, rest) = o.split_at(8);
        for row in rest.chunks(8) {
            for (a, b) in first.iter().zip(row) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_fully_masked_keys_stay_finite_and_uniform() {
        let block = AttentionBlockConfig::new(8, 8, 2).init::<TestBackend>(&device());
        let x = Tensor::<TestBackend, 3>::random([1, 2, 8], Distribution::Default, &device());
        let y = Tensor::<TestBackend, 3>::random([1, 4, 8], Distribution::Default, &device());
        let mask = Tensor::<TestBackend, 2>::zeros([1, 4], &device());

        let (out, weights) = block.forward_with_weights(x, Some(y), Some(mask));
        let w: Vec<f32> = weights.into_data().to_vec().unwrap();
        for &v in &w {
            assert!(v.is_finite());
            assert!((v - 0.25).abs() < 1e-5);
        }
        let o: Vec<f32> = out.into_data().to_vec().unwrap();
        assert!(o.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_layer_preserves_shape() {
        let layer = MapperTransformerLayerConfig::new(16, 16, 4).init::<TestBackend>(&device());
        let x = Tensor::<TestBackend, 3>::random([3, 6, 16], Distribution::Default, &device());
        let out = layer.forward(x, None, None);
        assert_eq!(out.dims(), [3, 6, 16]);
    }
}
