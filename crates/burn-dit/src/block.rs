//! DiT block with adaLN-Zero conditioning
//!
//! Architecture:
//! ```text
//! shift1, scale1, gate1, shift2, scale2, gate2 = Linear(SiLU(c)).chunk(6)
//! x = x + gate1 * attn(modulate(norm1(x), shift1, scale1))
//! x = x + gate2 * mlp(modulate(norm2(x), shift2, scale2))
//! ```
//!
//! The conditioning projection starts at zero, so every gate is zero and a
//! freshly built block is the identity on `x`.

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::silu;

use burn_dit_core::attention::{Attention, AttentionConfig};
use burn_dit_core::error::DitError;
use burn_dit_core::init::zero_linear;
use burn_dit_core::layernorm::{LayerNorm, LayerNormConfig};
use burn_dit_core::modulation::{modulate, split_modulation};
use burn_dit_core::perceptron::{AttentionPerceptron, AttentionPerceptronConfig};

/// Transformer block conditioned through adaLN-Zero
#[derive(Module, Debug)]
pub struct DiTBlock<B: Backend> {
    /// Pre-attention norm
    pub norm1: LayerNorm<B>,
    /// Self-attention
    pub attention: Attention<B>,
    /// Pre-perceptron norm
    pub norm2: LayerNorm<B>,
    /// Feed-forward network
    pub perceptron: AttentionPerceptron<B>,
    /// Conditioning projection: hidden -> 6 * hidden
    pub ada_ln: Linear<B>,
}

/// Configuration for DiTBlock
#[derive(Debug, Clone)]
pub struct DiTBlockConfig {
    /// Attention embedding dimension, must equal `hidden_size`
    pub attention_embedding_size: usize,
    /// Number of attention heads
    pub attention_heads: usize,
    /// Hidden dimension
    pub hidden_size: usize,
    /// Perceptron hidden size as a multiple of `hidden_size`
    pub mlp_ratio: f64,
    /// Learned scale/shift in the block norms
    pub layernorm_affine: bool,
    pub layernorm_epsilon: f64,
    pub perceptron_dropout_rate: f64,
    pub perceptron_bias: bool,
    /// Norm inside the perceptron
    pub perceptron_layernorm: bool,
}

impl DiTBlockConfig {
    /// DiT defaults: mlp_ratio 4, non-affine norms with eps 1e-6, biased perceptron
    pub fn new(hidden_size: usize, attention_heads: usize) -> Self {
        Self {
            attention_embedding_size: hidden_size,
            attention_heads,
            hidden_size,
            mlp_ratio: 4.0,
            layernorm_affine: false,
            layernorm_epsilon: 1e-6,
            perceptron_dropout_rate: 0.0,
            perceptron_bias: true,
            perceptron_layernorm: false,
        }
    }

    pub fn with_attention_embedding_size(mut self, size: usize) -> Self {
        self.attention_embedding_size = size;
        self
    }

    pub fn with_mlp_ratio(mut self, mlp_ratio: f64) -> Self {
        self.mlp_ratio = mlp_ratio;
        self
    }

    pub fn with_layernorm_affine(mut self, affine: bool) -> Self {
        self.layernorm_affine = affine;
        self
    }

    pub fn with_layernorm_epsilon(mut self, eps: f64) -> Self {
        self.layernorm_epsilon = eps;
        self
    }

    pub fn with_perceptron_dropout_rate(mut self, rate: f64) -> Self {
        self.perceptron_dropout_rate = rate;
        self
    }

    pub fn with_perceptron_bias(mut self, bias: bool) -> Self {
        self.perceptron_bias = bias;
        self
    }

    pub fn with_perceptron_layernorm(mut self, layernorm: bool) -> Self {
        self.perceptron_layernorm = layernorm;
        self
    }

    /// Perceptron hidden features, `hidden_size * mlp_ratio` truncated
    pub fn perceptron_hidden_size(&self) -> usize {
        (self.hidden_size as f64 * self.mlp_ratio) as usize
    }

    /// Initialize the block with a zeroed conditioning projection
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DiTBlock<B>, DitError> {
        if self.attention_embedding_size != self.hidden_size {
            return Err(DitError::DimensionMismatch {
                what: "attention embedding size vs hidden size",
                expected: self.hidden_size,
                actual: self.attention_embedding_size,
            });
        }
        if !(self.mlp_ratio > 0.0) || self.perceptron_hidden_size() == 0 {
            return Err(DitError::InvalidConfig(format!(
                "mlp_ratio {} gives an empty perceptron for hidden size {}",
                self.mlp_ratio, self.hidden_size
            )));
        }

        let norm = LayerNormConfig::new(self.hidden_size)
            .with_eps(self.layernorm_epsilon)
            .with_affine(self.layernorm_affine);

        let block = DiTBlock {
            norm1: norm.init(device),
            attention: AttentionConfig::new(self.attention_embedding_size, self.attention_heads)
                .init(device)?,
            norm2: norm.init(device),
            perceptron: AttentionPerceptronConfig::new(self.hidden_size)
                .with_hidden_features(self.perceptron_hidden_size())
                .with_out_features(self.hidden_size)
                .with_layer_norm(self.perceptron_layernorm)
                .with_bias(self.perceptron_bias)
                .with_dropout(self.perceptron_dropout_rate)
                .init(device)?,
            ada_ln: LinearConfig::new(self.hidden_size, 6 * self.hidden_size)
                .with_bias(true)
                .init(device),
        };

        Ok(block.zero_init_modulation())
    }
}

impl<B: Backend> DiTBlock<B> {
    /// Zeroes the conditioning projection so all gates start at zero
    pub fn zero_init_modulation(mut self) -> Self {
        self.ada_ln = zero_linear(self.ada_ln);
        tracing::debug!("zero-initialized DiT block modulation");
        self
    }

    /// Forward pass through the block
    ///
    /// # Arguments
    ///
    /// * `x` - Tokens [batch, seq_len, hidden_size]
    /// * `c` - Conditioning [batch, hidden_size]
    ///
    /// # Returns
    ///
    /// Tokens [batch, seq_len, hidden_size]
    pub fn forward(&self, x: Tensor<B, 3>, c: Tensor<B, 2>) -> Tensor<B, 3> {
        let [attn_shift, attn_scale, attn_gate, mlp_shift, mlp_scale, mlp_gate] =
            split_modulation::<B, 6>(self.ada_ln.forward(silu(c)));

        let attn_input = modulate(self.norm1.forward(x.clone()), attn_shift, attn_scale);
        let (attn_out, _) = self.attention.self_attention(attn_input, None);
        let x = x + attn_gate * attn_out;

        let mlp_input = modulate(self.norm2.forward(x.clone()), mlp_shift, mlp_scale);
        x + mlp_gate * self.perceptron.forward(mlp_input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_dit_core::init::fill_bias;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn to_vec(t: Tensor<TestBackend, 3>) -> Vec<f32> {
        t.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_dit_block_shape() {
        let device = Default::default();
        let block = DiTBlockConfig::new(64, 4)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([2, 16, 64], Distribution::Default, &device);
        let c = Tensor::random([2, 64], Distribution::Default, &device);
        assert_eq!(block.forward(x, c).dims(), [2, 16, 64]);
    }

    #[test]
    fn test_zero_gates_give_identity() {
        let device = Default::default();
        let block = DiTBlockConfig::new(32, 2)
            .with_mlp_ratio(1.0)
            .with_perceptron_layernorm(true)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::random([3, 9, 32], Distribution::Uniform(0.0, 1.0), &device);
        let c = Tensor::random([3, 32], Distribution::Normal(0.0, 5.0), &device);
        let y = block.forward(x.clone(), c);

        assert_eq!(to_vec(y), to_vec(x));
    }

    #[test]
    fn test_open_gates_change_output() {
        let device = Default::default();
        let mut block = DiTBlockConfig::new(32, 2)
            .init::<TestBackend>(&device)
            .unwrap();
        // Every modulation value (gates included) becomes 1
        block.ada_ln = fill_bias(block.ada_ln, 1.0);

        let x = Tensor::random([1, 4, 32], Distribution::Uniform(0.0, 1.0), &device);
        let c = Tensor::zeros([1, 32], &device);
        let y = block.forward(x.clone(), c);

        assert_ne!(to_vec(y), to_vec(x));
    }

    #[test]
    fn test_affine_norms() {
        let device = Default::default();
        let block = DiTBlockConfig::new(16, 4)
            .with_layernorm_affine(true)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(block.norm1.is_affine());
        assert!(block.norm2.is_affine());
    }

    #[test]
    fn test_config_errors() {
        let device = Default::default();

        let heads = DiTBlockConfig::new(30, 4).init::<TestBackend>(&device);
        assert!(matches!(heads, Err(DitError::HeadsNotDivisible { .. })));

        let mismatch = DiTBlockConfig::new(32, 4)
            .with_attention_embedding_size(64)
            .init::<TestBackend>(&device);
        assert!(matches!(mismatch, Err(DitError::DimensionMismatch { .. })));

        let ratio = DiTBlockConfig::new(32, 4)
            .with_mlp_ratio(0.0)
            .init::<TestBackend>(&device);
        assert!(matches!(ratio, Err(DitError::InvalidConfig(_))));
    }
}
