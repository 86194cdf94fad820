//! Multi-head scaled dot-product attention
//!
//! Unlike the fused attention used in LLM stacks, this module hands back the
//! softmax weights alongside the context so callers can inspect them. Batch
//! and head axes are merged into a single leading axis of size
//! `batch * num_heads` (sample-major: index `b * num_heads + h`).

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use crate::error::DitError;
use crate::init::xavier_linear;

/// Scaled dot-product attention over merged batch/head axes
///
/// # Arguments
///
/// * `q` - Queries [batch * heads, q_len, head_dim]
/// * `k` - Keys [batch * heads, k_len, head_dim]
/// * `v` - Values [batch * heads, k_len, head_dim]
/// * `mask` - Optional boolean mask [batch * heads, q_len, k_len], `true` = masked
///
/// # Returns
///
/// `(context, weights)` of shapes [batch * heads, q_len, head_dim] and
/// [batch * heads, q_len, k_len]. Masked positions get exactly zero weight.
pub fn scaled_dot_product<B: Backend>(
    q: Tensor<B, 3>,
    k: Tensor<B, 3>,
    v: Tensor<B, 3>,
    mask: Option<Tensor<B, 3, Bool>>,
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let [_, _, head_dim] = q.dims();

    let scores = q.matmul(k.swap_dims(1, 2)) / (head_dim as f64).sqrt();
    let scores = match mask {
        Some(m) => scores.mask_fill(m, f32::NEG_INFINITY),
        None => scores,
    };

    let weights = burn::tensor::activation::softmax(scores, 2);
    let context = weights.clone().matmul(v);

    (context, weights)
}

/// Multi-head attention with independent query, key and value projections
///
/// There is no output projection: the merged heads are returned directly.
#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    /// Query projection
    pub query_proj: Linear<B>,
    /// Key projection
    pub key_proj: Linear<B>,
    /// Value projection
    pub value_proj: Linear<B>,
    /// Number of heads
    pub num_heads: usize,
    /// Dimension per head
    pub head_dim: usize,
}

/// Configuration for Attention
#[derive(Debug, Clone)]
pub struct AttentionConfig {
    /// Token embedding dimension
    pub embed_dim: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Whether the projections carry a bias
    pub bias: bool,
}

impl AttentionConfig {
    /// Creates a new config with biased projections
    pub fn new(embed_dim: usize, num_heads: usize) -> Self {
        Self {
            embed_dim,
            num_heads,
            bias: true,
        }
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Initialize the attention module
    ///
    /// Fails when `embed_dim` is not divisible by `num_heads`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Attention<B>, DitError> {
        if self.num_heads == 0 || self.embed_dim % self.num_heads != 0 {
            return Err(DitError::HeadsNotDivisible {
                dim: self.embed_dim,
                heads: self.num_heads,
            });
        }

        let head_dim = self.embed_dim / self.num_heads;
        let inner_dim = self.num_heads * head_dim;
        let projection = || {
            xavier_linear(
                LinearConfig::new(self.embed_dim, inner_dim).with_bias(self.bias),
                device,
            )
        };

        tracing::debug!(
            embed_dim = self.embed_dim,
            num_heads = self.num_heads,
            head_dim,
            "initialized attention"
        );

        Ok(Attention {
            query_proj: projection(),
            key_proj: projection(),
            value_proj: projection(),
            num_heads: self.num_heads,
            head_dim,
        })
    }
}

impl<B: Backend> Attention<B> {
    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `query` - Query tokens [batch, q_len, embed_dim]
    /// * `key` - Key tokens [batch, k_len, embed_dim]
    /// * `value` - Value tokens [batch, k_len, embed_dim]
    /// * `mask` - Optional boolean mask [batch or 1, q_len, k_len], `true` = masked;
    ///   repeated across heads
    ///
    /// # Returns
    ///
    /// `(context, weights)`: context [batch, q_len, embed_dim] and attention
    /// weights [batch * num_heads, q_len, k_len]
    pub fn forward(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        value: Tensor<B, 3>,
        mask: Option<Tensor<B, 3, Bool>>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [batch, q_len, _] = query.dims();
        let [_, k_len, _] = key.dims();

        let q = self.split_heads(self.query_proj.forward(query));
        let k = self.split_heads(self.key_proj.forward(key));
        let v = self.split_heads(self.value_proj.forward(value));

        let mask = mask.map(|m| self.expand_mask(m, batch, q_len, k_len));
        let (context, weights) = scaled_dot_product(q, k, v, mask);

        (self.merge_heads(context, batch), weights)
    }

    /// Self-attention: the same tokens serve as query, key and value
    pub fn self_attention(
        &self,
        x: Tensor<B, 3>,
        mask: Option<Tensor<B, 3, Bool>>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        self.forward(x.clone(), x.clone(), x, mask)
    }

    /// [batch, len, heads * head_dim] -> [batch * heads, len, head_dim]
    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, len, _] = x.dims();
        x.reshape([batch, len, self.num_heads, self.head_dim])
            .swap_dims(1, 2)
            .reshape([batch * self.num_heads, len, self.head_dim])
    }

    /// [batch * heads, len, head_dim] -> [batch, len, heads * head_dim]
    fn merge_heads(&self, x: Tensor<B, 3>, batch: usize) -> Tensor<B, 3> {
        let [_, len, _] = x.dims();
        x.reshape([batch, self.num_heads, len, self.head_dim])
            .swap_dims(1, 2)
            .reshape([batch, len, self.num_heads * self.head_dim])
    }

    /// [batch or 1, q_len, k_len] -> [batch * heads, q_len, k_len]
    fn expand_mask(
        &self,
        mask: Tensor<B, 3, Bool>,
        batch: usize,
        q_len: usize,
        k_len: usize,
    ) -> Tensor<B, 3, Bool> {
        mask.unsqueeze_dim::<4>(1)
            .expand([batch, self.num_heads, q_len, k_len])
            .reshape([batch * self.num_heads, q_len, k_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_attention_shapes() {
        let device = Default::default();
        let attention = AttentionConfig::new(64, 4)
            .init::<TestBackend>(&device)
            .unwrap();

        let q = Tensor::random([2, 10, 64], Distribution::Default, &device);
        let kv = Tensor::random([2, 6, 64], Distribution::Default, &device);
        let (context, weights) = attention.forward(q, kv.clone(), kv, None);

        assert_eq!(context.dims(), [2, 10, 64]);
        assert_eq!(weights.dims(), [8, 10, 6]);
    }

    #[test]
    fn test_heads_not_divisible() {
        let device = Default::default();
        let err = AttentionConfig::new(100, 3)
            .init::<TestBackend>(&device)
            .unwrap_err();
        assert_eq!(err, DitError::HeadsNotDivisible { dim: 100, heads: 3 });

        assert!(AttentionConfig::new(64, 0)
            .init::<TestBackend>(&device)
            .is_err());
    }

    #[test]
    fn test_weights_rows_sum_to_one() {
        let device = Default::default();
        let attention = AttentionConfig::new(32, 2)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([3, 7, 32], Distribution::Default, &device);
        let (_, weights) = attention.self_attention(x, None);

        let sums: Vec<f32> = weights.sum_dim(2).into_data().to_vec().unwrap();
        assert_eq!(sums.len(), 3 * 2 * 7);
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5, "row sum {sum}");
        }
    }

    #[test]
    fn test_masked_positions_get_zero_weight() {
        let device = Default::default();
        let attention = AttentionConfig::new(16, 2)
            .init::<TestBackend>(&device)
            .unwrap();

        // Each query may only look at keys 0 and 2
        let mask = Tensor::<TestBackend, 3, Bool>::from_data(
            [[
                [false, true, false],
                [false, true, false],
                [false, true, false],
            ]],
            &device,
        );
        let x = Tensor::random([2, 3, 16], Distribution::Default, &device);
        let (_, weights) = attention.self_attention(x, Some(mask));

        let weights: Vec<f32> = weights.into_data().to_vec().unwrap();
        // [batch * heads = 4, q_len = 3, k_len = 3]
        for row in weights.chunks(3) {
            assert_eq!(row[1], 0.0);
            assert!((row[0] + row[2] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_per_sample_mask_lands_on_its_sample() {
        let device = Default::default();
        let attention = AttentionConfig::new(16, 2)
            .init::<TestBackend>(&device)
            .unwrap();

        // Sample 0 hides key 0, sample 1 hides key 2
        let mask = Tensor::<TestBackend, 3, Bool>::from_data(
            [
                [[true, false, false], [true, false, false], [true, false, false]],
                [[false, false, true], [false, false, true], [false, false, true]],
            ],
            &device,
        );
        let x = Tensor::random([2, 3, 16], Distribution::Default, &device);
        let (_, weights) = attention.self_attention(x, Some(mask));
        assert_eq!(weights.dims(), [4, 3, 3]);

        let weights: Vec<f32> = weights.into_data().to_vec().unwrap();
        // Rows of sample b are weights[b * heads .. (b + 1) * heads]
        let (sample0, sample1) = weights.split_at(2 * 3 * 3);
        for row in sample0.chunks(3) {
            assert_eq!(row[0], 0.0);
            assert!(row[1] > 0.0 && row[2] > 0.0);
        }
        for row in sample1.chunks(3) {
            assert_eq!(row[2], 0.0);
            assert!(row[0] > 0.0 && row[1] > 0.0);
        }
    }

    #[test]
    fn test_projections_use_xavier_init() {
        let device = Default::default();
        let attention = AttentionConfig::new(64, 4)
            .init::<TestBackend>(&device)
            .unwrap();
        let bound = (6.0f32 / 128.0).sqrt();

        for proj in [&attention.query_proj, &attention.key_proj, &attention.value_proj] {
            let weights: Vec<f32> = proj.weight.val().into_data().to_vec().unwrap();
            assert!(weights.iter().all(|w| w.abs() <= bound + 1e-6));
            // Beyond what the default 1/sqrt(fan_in) bound allows
            assert!(weights.iter().any(|w| w.abs() > 0.13));
        }
    }

    #[test]
    fn test_scaled_dot_product_uniform_keys() {
        let device = Default::default();
        // Identical keys give uniform weights; the context is the mean of values
        let q = Tensor::<TestBackend, 3>::ones([1, 1, 4], &device);
        let k = Tensor::<TestBackend, 3>::ones([1, 2, 4], &device);
        let v = Tensor::<TestBackend, 3>::from_floats([[[0.0; 4], [2.0; 4]]], &device);

        let (context, weights) = scaled_dot_product(q, k, v, None);
        let weights: Vec<f32> = weights.into_data().to_vec().unwrap();
        let context: Vec<f32> = context.into_data().to_vec().unwrap();

        assert!(weights.iter().all(|w| (w - 0.5).abs() < 1e-6));
        assert!(context.iter().all(|c| (c - 1.0).abs() < 1e-6));
    }
}
