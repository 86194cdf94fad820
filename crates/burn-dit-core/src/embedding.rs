//! Conditioning embedders
//!
//! Timesteps and class labels are each mapped to a `[batch, hidden]` vector;
//! the DiT conditioning signal is their sum.

use burn::nn::{Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::Distribution;
use burn::tensor::activation::silu;

use crate::error::{DitError, check_probability};

/// Default period of the lowest sinusoid frequency
pub const DEFAULT_MAX_PERIOD: f64 = 10_000.0;

/// Sinusoidal frequency features of scalar timesteps
///
/// Uses `dim / 2` log-spaced frequencies `exp(-ln(max_period) * i / half)`.
/// The first half of the feature axis holds the cosines, the second half the
/// sines; an odd `dim` is padded with one zero column.
///
/// # Arguments
///
/// * `t` - Timesteps [batch], may be fractional
/// * `dim` - Output feature size
/// * `max_period` - Controls the minimum frequency
///
/// # Returns
///
/// Frequency embedding [batch, dim]
pub fn frequency_embedding<B: Backend>(
    t: Tensor<B, 1>,
    dim: usize,
    max_period: f64,
) -> Tensor<B, 2> {
    let device = t.device();
    let [batch] = t.dims();
    let half = dim / 2;

    if half == 0 {
        return Tensor::zeros([batch, dim], &device);
    }

    let log_period = max_period.ln();
    let freqs: Vec<f32> = (0..half)
        .map(|i| (-log_period * i as f64 / half as f64).exp() as f32)
        .collect();
    let freqs = Tensor::<B, 1>::from_floats(freqs.as_slice(), &device);

    // [batch, half]
    let args = t.unsqueeze_dim::<2>(1) * freqs.unsqueeze_dim::<2>(0);

    let mut parts = vec![args.clone().cos(), args.sin()];
    if dim % 2 == 1 {
        parts.push(Tensor::zeros([batch, 1], &device));
    }
    Tensor::cat(parts, 1)
}

/// Embeds scalar timesteps into the hidden dimension
///
/// Sinusoidal features followed by `Linear -> SiLU -> Linear`.
#[derive(Module, Debug)]
pub struct TimestepEmbedder<B: Backend> {
    pub linear1: Linear<B>,
    pub linear2: Linear<B>,
    /// Size of the sinusoidal feature vector
    pub frequency_embedding_size: usize,
    pub max_period: f64,
}

/// Configuration for TimestepEmbedder
#[derive(Debug, Clone)]
pub struct TimestepEmbedderConfig {
    /// Output dimension
    pub hidden_size: usize,
    /// Sinusoidal feature size, independent of `hidden_size`
    pub frequency_embedding_size: usize,
    /// Whether the perceptron layers carry a bias
    pub bias: bool,
    pub max_period: f64,
}

impl TimestepEmbedderConfig {
    /// Creates a new config with the default maximum period
    pub fn new(hidden_size: usize, frequency_embedding_size: usize, bias: bool) -> Self {
        Self {
            hidden_size,
            frequency_embedding_size,
            bias,
            max_period: DEFAULT_MAX_PERIOD,
        }
    }

    pub fn with_max_period(mut self, max_period: f64) -> Self {
        self.max_period = max_period;
        self
    }

    /// Initialize the module; perceptron weights are drawn from N(0, 0.02)
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<TimestepEmbedder<B>, DitError> {
        if self.hidden_size == 0 || self.frequency_embedding_size == 0 {
            return Err(DitError::InvalidConfig(format!(
                "timestep embedder sizes must be non-zero, got hidden {} / frequency {}",
                self.hidden_size, self.frequency_embedding_size
            )));
        }

        let initializer = Initializer::Normal {
            mean: 0.0,
            std: 0.02,
        };

        Ok(TimestepEmbedder {
            linear1: LinearConfig::new(self.frequency_embedding_size, self.hidden_size)
                .with_bias(self.bias)
                .with_initializer(initializer.clone())
                .init(device),
            linear2: LinearConfig::new(self.hidden_size, self.hidden_size)
                .with_bias(self.bias)
                .with_initializer(initializer)
                .init(device),
            frequency_embedding_size: self.frequency_embedding_size,
            max_period: self.max_period,
        })
    }
}

impl<B: Backend> TimestepEmbedder<B> {
    /// Embeds timesteps
    ///
    /// # Arguments
    ///
    /// * `t` - Timesteps [batch]
    ///
    /// # Returns
    ///
    /// Timestep embedding [batch, hidden_size]
    pub fn forward(&self, t: Tensor<B, 1>) -> Tensor<B, 2> {
        let t_freq = frequency_embedding(t, self.frequency_embedding_size, self.max_period);
        let x = self.linear1.forward(t_freq);
        let x = silu(x);
        self.linear2.forward(x)
    }
}

/// Embeds class labels, with label dropout for classifier-free guidance
///
/// When `dropout_prob > 0` the table carries one extra row at index
/// `num_classes`, the "null" class that dropped labels are mapped to.
#[derive(Module, Debug)]
pub struct LabelEmbedder<B: Backend> {
    pub embedding_table: Embedding<B>,
    pub num_classes: usize,
    pub hidden_size: usize,
    pub dropout_prob: f64,
}

/// Configuration for LabelEmbedder
#[derive(Debug, Clone)]
pub struct LabelEmbedderConfig {
    pub num_classes: usize,
    pub hidden_size: usize,
    /// Probability of replacing a label with the null class
    pub dropout_prob: f64,
}

impl LabelEmbedderConfig {
    pub fn new(num_classes: usize, hidden_size: usize, dropout_prob: f64) -> Self {
        Self {
            num_classes,
            hidden_size,
            dropout_prob,
        }
    }

    /// Number of table rows: one extra for the null class when dropout is enabled
    pub fn table_size(&self) -> usize {
        self.num_classes + usize::from(self.dropout_prob > 0.0)
    }

    /// Initialize the module; the table is drawn from N(0, 0.02)
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<LabelEmbedder<B>, DitError> {
        check_probability("label dropout", self.dropout_prob, true)?;
        if self.num_classes == 0 || self.hidden_size == 0 {
            return Err(DitError::InvalidConfig(format!(
                "label embedder needs classes and hidden size, got {} / {}",
                self.num_classes, self.hidden_size
            )));
        }

        Ok(LabelEmbedder {
            embedding_table: EmbeddingConfig::new(self.table_size(), self.hidden_size)
                .with_initializer(Initializer::Normal {
                    mean: 0.0,
                    std: 0.02,
                })
                .init(device),
            num_classes: self.num_classes,
            hidden_size: self.hidden_size,
            dropout_prob: self.dropout_prob,
        })
    }
}

impl<B: Backend> LabelEmbedder<B> {
    /// Whether the table has a null-class row
    pub fn has_null_class(&self) -> bool {
        self.dropout_prob > 0.0
    }

    /// Index of the null class
    pub fn null_class(&self) -> usize {
        self.num_classes
    }

    /// Replaces labels with the null class
    ///
    /// With `force_drop`, exactly the `true` entries are replaced. Without it,
    /// each label is replaced when a uniform draw falls below `dropout_prob`.
    pub fn drop_labels(
        &self,
        labels: Tensor<B, 1, Int>,
        force_drop: Option<Tensor<B, 1, Bool>>,
    ) -> Tensor<B, 1, Int> {
        let drop = match force_drop {
            Some(mask) => mask,
            None => {
                let [batch] = labels.dims();
                Tensor::<B, 1>::random([batch], Distribution::Uniform(0.0, 1.0), &labels.device())
                    .lower_elem(self.dropout_prob)
            }
        };
        labels.mask_fill(drop, self.num_classes as i64)
    }

    /// Table lookup without any dropping
    ///
    /// Labels must lie in the table; out-of-range labels are not checked.
    pub fn embed(&self, labels: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        let [batch] = labels.dims();
        self.embedding_table
            .forward(labels.unsqueeze_dim::<2>(1))
            .reshape([batch, self.hidden_size])
    }

    /// Embeds labels, randomly dropping them when dropout is enabled
    ///
    /// # Arguments
    ///
    /// * `labels` - Class indices [batch] in `[0, num_classes)`
    ///
    /// # Returns
    ///
    /// Label embedding [batch, hidden_size]
    pub fn forward(&self, labels: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        let labels = if self.has_null_class() {
            self.drop_labels(labels, None)
        } else {
            labels
        };
        self.embed(labels)
    }

    /// Embeds labels, dropping exactly those flagged in `force_drop`
    ///
    /// Fails when the table was built without a null class.
    pub fn forward_with_drop(
        &self,
        labels: Tensor<B, 1, Int>,
        force_drop: Tensor<B, 1, Bool>,
    ) -> Result<Tensor<B, 2>, DitError> {
        if !self.has_null_class() {
            return Err(DitError::InvalidConfig(
                "label embedder was built without a null class (dropout_prob = 0)".into(),
            ));
        }
        Ok(self.embed(self.drop_labels(labels, Some(force_drop))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn to_vec<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        t.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_timestep_embedder_shape() {
        let device = Default::default();
        let embedder = TimestepEmbedderConfig::new(128, 256, true)
            .init::<TestBackend>(&device)
            .unwrap();

        let t = Tensor::random([3], Distribution::Uniform(0.0, 1000.0), &device);
        assert_eq!(embedder.forward(t).dims(), [3, 128]);
    }

    #[test]
    fn test_timestep_embedder_odd_frequency_size() {
        let device = Default::default();
        for freq in [1, 7, 255] {
            let embedder = TimestepEmbedderConfig::new(16, freq, false)
                .init::<TestBackend>(&device)
                .unwrap();
            let t = Tensor::from_floats([0.0, 10.0], &device);
            assert_eq!(embedder.forward(t).dims(), [2, 16]);
        }
    }

    #[test]
    fn test_frequency_embedding_cos_then_sin() {
        let device = Default::default();
        let t = Tensor::<TestBackend, 1>::from_floats([0.0, 1.0], &device);
        let emb = frequency_embedding(t, 8, DEFAULT_MAX_PERIOD);
        assert_eq!(emb.dims(), [2, 8]);

        let emb = to_vec(emb);
        // t = 0: cos terms are 1, sin terms are 0
        assert_eq!(&emb[0..4], &[1.0; 4]);
        assert_eq!(&emb[4..8], &[0.0; 4]);
        // t = 1, first frequency is 1
        assert!((emb[8] - 1.0_f32.cos()).abs() < 1e-6);
        assert!((emb[12] - 1.0_f32.sin()).abs() < 1e-6);
        // Last frequency: 10000^(-3/4) = 0.001
        assert!((emb[15] - 0.001_f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn test_frequency_embedding_odd_pads_zero() {
        let device = Default::default();
        let t = Tensor::<TestBackend, 1>::from_floats([3.0], &device);
        let emb = to_vec(frequency_embedding(t, 5, DEFAULT_MAX_PERIOD));

        assert_eq!(emb.len(), 5);
        assert_eq!(emb[4], 0.0);
        assert!((emb[0] - 3.0_f32.cos()).abs() < 1e-6);
        assert!((emb[2] - 3.0_f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn test_label_table_size() {
        assert_eq!(LabelEmbedderConfig::new(1000, 8, 0.1).table_size(), 1001);
        assert_eq!(LabelEmbedderConfig::new(1000, 8, 0.0).table_size(), 1000);
    }

    #[test]
    fn test_label_embedder_no_dropout_is_lookup() {
        let device = Default::default();
        let embedder = LabelEmbedderConfig::new(10, 16, 0.0)
            .init::<TestBackend>(&device)
            .unwrap();
        assert!(!embedder.has_null_class());

        let labels = Tensor::<TestBackend, 1, Int>::from_ints([3, 0, 9], &device);
        let out = embedder.forward(labels.clone());
        assert_eq!(out.dims(), [3, 16]);

        let expected = embedder.embedding_table.weight.val().select(0, labels);
        assert_eq!(to_vec(out), to_vec(expected));
    }

    #[test]
    fn test_label_embedder_full_dropout_uses_null_class() {
        let device = Default::default();
        let embedder = LabelEmbedderConfig::new(10, 8, 1.0)
            .init::<TestBackend>(&device)
            .unwrap();

        let labels = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 3, 4], &device);
        let dropped: Vec<i64> = embedder
            .drop_labels(labels.clone(), None)
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap();
        assert_eq!(dropped, vec![10; 4]);

        let out = embedder.forward(labels);
        let null_row = embedder
            .embedding_table
            .weight
            .val()
            .slice([10..11, 0..8])
            .repeat_dim(0, 4);
        assert_eq!(to_vec(out), to_vec(null_row));
    }

    #[test]
    fn test_label_embedder_forced_drop() {
        let device = Default::default();
        let embedder = LabelEmbedderConfig::new(5, 4, 0.1)
            .init::<TestBackend>(&device)
            .unwrap();

        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 2], &device);
        let force = Tensor::<TestBackend, 1, Bool>::from_data([false, true, false], &device);
        let dropped: Vec<i64> = embedder
            .drop_labels(labels.clone(), Some(force.clone()))
            .into_data()
            .convert::<i64>()
            .to_vec()
            .unwrap();
        assert_eq!(dropped, vec![0, 5, 2]);

        let out = embedder.forward_with_drop(labels, force).unwrap();
        assert_eq!(out.dims(), [3, 4]);
    }

    #[test]
    fn test_forced_drop_without_null_class_fails() {
        let device = Default::default();
        let embedder = LabelEmbedderConfig::new(5, 4, 0.0)
            .init::<TestBackend>(&device)
            .unwrap();

        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0], &device);
        let force = Tensor::<TestBackend, 1, Bool>::from_data([true], &device);
        assert!(embedder.forward_with_drop(labels, force).is_err());
    }

    #[test]
    fn test_label_embedder_rejects_bad_probability() {
        let device = Default::default();
        let result = LabelEmbedderConfig::new(5, 4, -0.5).init::<TestBackend>(&device);
        assert!(matches!(result, Err(DitError::InvalidProbability { .. })));
    }
}
