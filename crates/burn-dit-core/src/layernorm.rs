//! Layer normalization implementation
//!
//! Normalizes across the last dimension of the input tensor. The learned
//! affine transform is optional: adaLN layers normalize without it and let
//! the conditioning network supply scale and shift instead.

use burn::module::Param;
use burn::prelude::*;

/// Layer normalization module
///
/// # Formula
///
/// For input x with last dimension of size D:
/// ```text
/// y = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias
/// ```
///
/// `weight` and `bias` are absent when the norm is built without affine
/// parameters, in which case only the normalization is applied.
#[derive(Module, Debug)]
pub struct LayerNorm<B: Backend> {
    /// Scale parameter
    pub weight: Option<Param<Tensor<B, 1>>>,
    /// Shift parameter
    pub bias: Option<Param<Tensor<B, 1>>>,
    /// Epsilon for numerical stability
    pub eps: f64,
}

/// Configuration for LayerNorm
#[derive(Debug, Clone)]
pub struct LayerNormConfig {
    /// Size of the normalized (last) dimension
    pub size: usize,
    /// Epsilon added to the variance
    pub eps: f64,
    /// Whether to learn an elementwise scale and shift
    pub affine: bool,
}

impl LayerNormConfig {
    /// Affine layer norm with eps = 1e-5
    pub fn new(size: usize) -> Self {
        Self {
            size,
            eps: 1e-5,
            affine: true,
        }
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_affine(mut self, affine: bool) -> Self {
        self.affine = affine;
        self
    }

    /// Initialize the module
    pub fn init<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        let (weight, bias) = if self.affine {
            (
                Some(Param::from_tensor(Tensor::ones([self.size], device))),
                Some(Param::from_tensor(Tensor::zeros([self.size], device))),
            )
        } else {
            (None, None)
        };

        LayerNorm {
            weight,
            bias,
            eps: self.eps,
        }
    }
}

impl<B: Backend> LayerNorm<B> {
    /// Creates an affine layer norm with the default epsilon
    pub fn new(size: usize, device: &B::Device) -> Self {
        LayerNormConfig::new(size).init(device)
    }

    /// Whether learned scale and shift are applied
    pub fn is_affine(&self) -> bool {
        self.weight.is_some()
    }

    /// Applies layer normalization to the input tensor
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor of any dimensionality
    ///
    /// # Returns
    ///
    /// Normalized tensor with same shape as input
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let last_dim = D - 1;
        let mean = x.clone().mean_dim(last_dim);
        // Population variance, as in the usual layer norm definition
        let var = x.clone().var_bias(last_dim);

        let x_norm = (x - mean) / (var + self.eps).sqrt();

        match (&self.weight, &self.bias) {
            (Some(weight), Some(bias)) => {
                x_norm * weight.val().unsqueeze() + bias.val().unsqueeze()
            }
            (Some(weight), None) => x_norm * weight.val().unsqueeze(),
            (None, Some(bias)) => x_norm + bias.val().unsqueeze(),
            (None, None) => x_norm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_layer_norm_zero_mean_unit_variance() {
        let device = Default::default();
        let norm = LayerNormConfig::new(4)
            .with_affine(false)
            .with_eps(1e-6)
            .init::<TestBackend>(&device);
        assert!(!norm.is_affine());

        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0, 4.0]], &device);
        let y: Vec<f32> = norm.forward(x).into_data().to_vec().unwrap();

        let mean: f32 = y.iter().sum::<f32>() / 4.0;
        let var: f32 = y.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_layer_norm_affine_shape() {
        let device = Default::default();
        let norm = LayerNorm::<TestBackend>::new(32, &device);
        assert!(norm.is_affine());

        let x = Tensor::<TestBackend, 3>::random(
            [2, 5, 32],
            burn::tensor::Distribution::Default,
            &device,
        );
        assert_eq!(norm.forward(x).dims(), [2, 5, 32]);
    }
}
