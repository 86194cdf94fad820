//! Position-wise feed-forward network for transformer blocks
//!
//! Kept separate from the attention module so alternative FFN designs can be
//! swapped in without touching the block.

use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;

use crate::error::{DitError, check_probability};
use crate::init::xavier_linear;
use crate::layernorm::{LayerNorm, LayerNormConfig};

/// A setting that may differ between the first and second linear layer
///
/// Built from a single value (both layers share it) or an explicit pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerPair<T> {
    pub first: T,
    pub second: T,
}

impl<T: Copy> LayerPair<T> {
    pub fn new(first: T, second: T) -> Self {
        Self { first, second }
    }

    /// Same value for both layers
    pub fn splat(value: T) -> Self {
        Self {
            first: value,
            second: value,
        }
    }
}

macro_rules! layer_pair_from {
    ($($ty:ty),*) => {$(
        impl From<$ty> for LayerPair<$ty> {
            fn from(value: $ty) -> Self {
                Self::splat(value)
            }
        }

        impl From<($ty, $ty)> for LayerPair<$ty> {
            fn from((first, second): ($ty, $ty)) -> Self {
                Self::new(first, second)
            }
        }
    )*};
}

layer_pair_from!(bool, f64);

/// GELU with the tanh approximation
///
/// ```text
/// 0.5 * x * (1 + tanh(sqrt(2 / pi) * (x + 0.044715 * x^3)))
/// ```
pub fn gelu_tanh<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let coeff = (2.0 / std::f64::consts::PI).sqrt();
    let inner = (x.clone() + x.clone().powi_scalar(3) * 0.044715) * coeff;
    x * (inner.tanh() + 1.0) * 0.5
}

/// Two-layer perceptron
///
/// # Architecture
///
/// ```text
/// fc1 -> GELU(tanh) -> dropout -> [LayerNorm] -> fc2 -> dropout
/// ```
///
/// Dropout is only active on autodiff backends, following burn's `Dropout`.
#[derive(Module, Debug)]
pub struct AttentionPerceptron<B: Backend> {
    /// Input projection
    pub fc1: Linear<B>,
    pub drop1: Dropout,
    /// Optional norm over the hidden features
    pub norm: Option<LayerNorm<B>>,
    /// Output projection
    pub fc2: Linear<B>,
    pub drop2: Dropout,
}

/// Configuration for AttentionPerceptron
#[derive(Debug, Clone)]
pub struct AttentionPerceptronConfig {
    /// Input dimension
    pub in_features: usize,
    /// Hidden dimension, defaults to `in_features`
    pub hidden_features: Option<usize>,
    /// Output dimension, defaults to `in_features`
    pub out_features: Option<usize>,
    /// Normalize the hidden features before the second projection
    pub layer_norm: bool,
    /// Bias for (fc1, fc2)
    pub bias: LayerPair<bool>,
    /// Dropout probability after (fc1, fc2)
    pub dropout: LayerPair<f64>,
}

impl AttentionPerceptronConfig {
    /// Creates a new config: square, biased, no norm, no dropout
    pub fn new(in_features: usize) -> Self {
        Self {
            in_features,
            hidden_features: None,
            out_features: None,
            layer_norm: false,
            bias: LayerPair::splat(true),
            dropout: LayerPair::splat(0.0),
        }
    }

    pub fn with_hidden_features(mut self, hidden_features: usize) -> Self {
        self.hidden_features = Some(hidden_features);
        self
    }

    pub fn with_out_features(mut self, out_features: usize) -> Self {
        self.out_features = Some(out_features);
        self
    }

    pub fn with_layer_norm(mut self, layer_norm: bool) -> Self {
        self.layer_norm = layer_norm;
        self
    }

    /// Accepts `true` or `(true, false)`
    pub fn with_bias(mut self, bias: impl Into<LayerPair<bool>>) -> Self {
        self.bias = bias.into();
        self
    }

    /// Accepts `0.1` or `(0.1, 0.0)`
    pub fn with_dropout(mut self, dropout: impl Into<LayerPair<f64>>) -> Self {
        self.dropout = dropout.into();
        self
    }

    pub fn hidden_features(&self) -> usize {
        self.hidden_features.unwrap_or(self.in_features)
    }

    pub fn out_features(&self) -> usize {
        self.out_features.unwrap_or(self.in_features)
    }

    /// Initialize the module
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<AttentionPerceptron<B>, DitError> {
        check_probability("perceptron dropout", self.dropout.first, false)?;
        check_probability("perceptron dropout", self.dropout.second, false)?;

        let hidden = self.hidden_features();
        let out = self.out_features();
        if self.in_features == 0 || hidden == 0 || out == 0 {
            return Err(DitError::InvalidConfig(format!(
                "perceptron features must be non-zero, got {} -> {} -> {}",
                self.in_features, hidden, out
            )));
        }

        Ok(AttentionPerceptron {
            fc1: xavier_linear(
                LinearConfig::new(self.in_features, hidden).with_bias(self.bias.first),
                device,
            ),
            drop1: DropoutConfig::new(self.dropout.first).init(),
            norm: self
                .layer_norm
                .then(|| LayerNormConfig::new(hidden).init(device)),
            fc2: xavier_linear(
                LinearConfig::new(hidden, out).with_bias(self.bias.second),
                device,
            ),
            drop2: DropoutConfig::new(self.dropout.second).init(),
        })
    }
}

impl<B: Backend> AttentionPerceptron<B> {
    /// Applies the perceptron
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, seq_len, in_features]
    ///
    /// # Returns
    ///
    /// Output tensor [batch, seq_len, out_features]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.fc1.forward(x);
        let x = gelu_tanh(x);
        let x = self.drop1.forward(x);
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        let x = self.fc2.forward(x);
        self.drop2.forward(x)
    }
}
