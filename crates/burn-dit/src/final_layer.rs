//! DiT output head
//!
//! Projects tokens back to flattened patches (`patch_size² * out_channels`),
//! with adaLN shift/scale from the conditioning vector. Both projections start
//! at zero, so a fresh model predicts all zeros.

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::silu;

use burn_dit_core::error::DitError;
use burn_dit_core::init::zero_linear;
use burn_dit_core::layernorm::{LayerNorm, LayerNormConfig};
use burn_dit_core::modulation::{modulate, split_modulation};

#[derive(Module, Debug)]
pub struct FinalLayer<B: Backend> {
    /// Non-affine norm, eps 1e-6
    pub norm: LayerNorm<B>,
    /// hidden -> patch_size² * out_channels
    pub linear: Linear<B>,
    /// Conditioning projection: hidden -> 2 * hidden (shift, scale)
    pub ada_ln: Linear<B>,
}

/// Configuration for FinalLayer
#[derive(Debug, Clone)]
pub struct FinalLayerConfig {
    pub hidden_size: usize,
    pub patch_size: usize,
    pub out_channels: usize,
}

impl FinalLayerConfig {
    pub fn new(hidden_size: usize, patch_size: usize, out_channels: usize) -> Self {
        Self {
            hidden_size,
            patch_size,
            out_channels,
        }
    }

    /// Flattened patch size
    pub fn out_features(&self) -> usize {
        self.patch_size * self.patch_size * self.out_channels
    }

    /// Initialize with both projections zeroed
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<FinalLayer<B>, DitError> {
        if self.hidden_size == 0 || self.out_features() == 0 {
            return Err(DitError::InvalidConfig(format!(
                "final layer sizes must be non-zero: hidden {}, patch {}, channels {}",
                self.hidden_size, self.patch_size, self.out_channels
            )));
        }

        let layer = FinalLayer {
            norm: LayerNormConfig::new(self.hidden_size)
                .with_eps(1e-6)
                .with_affine(false)
                .init(device),
            linear: LinearConfig::new(self.hidden_size, self.out_features())
                .with_bias(true)
                .init(device),
            ada_ln: LinearConfig::new(self.hidden_size, 2 * self.hidden_size)
                .with_bias(true)
                .init(device),
        };

        Ok(layer.zero_init())
    }
}

impl<B: Backend> FinalLayer<B> {
    /// Zeroes the output and conditioning projections
    pub fn zero_init(mut self) -> Self {
        self.linear = zero_linear(self.linear);
        self.ada_ln = zero_linear(self.ada_ln);
        tracing::debug!("zero-initialized final layer");
        self
    }

    /// # Arguments
    ///
    /// * `x` - Tokens [batch, seq_len, hidden_size]
    /// * `c` - Conditioning [batch, hidden_size]
    ///
    /// # Returns
    ///
    /// Flattened patches [batch, seq_len, patch_size² * out_channels]
    pub fn forward(&self, x: Tensor<B, 3>, c: Tensor<B, 2>) -> Tensor<B, 3> {
        let [shift, scale] = split_modulation::<B, 2>(self.ada_ln.forward(silu(c)));
        let x = modulate(self.norm.forward(x), shift, scale);
        self.linear.forward(x)
    }
}
