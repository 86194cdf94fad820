//! End-to-end run of the module stack at the sizes used by the smoke test:
//! batch 3, 784 tokens, hidden 128, 2 heads.

use burn::prelude::*;
use burn::tensor::Distribution;
use burn_dit::{DiTBlockConfig, FinalLayerConfig};
use burn_dit_core::attention::AttentionConfig;
use burn_dit_core::embedding::{LabelEmbedderConfig, TimestepEmbedderConfig};
use burn_ndarray::NdArray;

type TestBackend = NdArray<f32>;

const BATCH: usize = 3;
const TOKENS: usize = 784;
const HIDDEN: usize = 128;
const HEADS: usize = 2;

#[test]
fn test_block_and_final_layer_shapes() {
    let device = Default::default();

    let t_embedder = TimestepEmbedderConfig::new(HIDDEN, 256, true)
        .init::<TestBackend>(&device)
        .unwrap();
    let y_embedder = LabelEmbedderConfig::new(1000, HIDDEN, 0.1)
        .init::<TestBackend>(&device)
        .unwrap();

    let t = Tensor::random([BATCH], Distribution::Uniform(0.0, 1.0), &device);
    let y = Tensor::<TestBackend, 1, Int>::from_ints([1, 500, 998], &device);
    let c = t_embedder.forward(t) + y_embedder.forward(y);
    assert_eq!(c.dims(), [BATCH, HIDDEN]);

    let attention = AttentionConfig::new(HIDDEN, HEADS)
        .init::<TestBackend>(&device)
        .unwrap();
    let x = Tensor::random([BATCH, TOKENS, HIDDEN], Distribution::Uniform(0.0, 1.0), &device);
    let (context, weights) = attention.self_attention(x.clone(), None);
    assert_eq!(context.dims(), [BATCH, TOKENS, HIDDEN]);
    assert_eq!(weights.dims(), [BATCH * HEADS, TOKENS, TOKENS]);

    let block = DiTBlockConfig::new(HIDDEN, HEADS)
        .with_mlp_ratio(1.0)
        .with_layernorm_affine(false)
        .with_layernorm_epsilon(1e-6)
        .with_perceptron_dropout_rate(0.0)
        .with_perceptron_bias(true)
        .with_perceptron_layernorm(true)
        .init::<TestBackend>(&device)
        .unwrap();
    let result = block.forward(x.clone(), c.clone());
    assert_eq!(result.dims(), [BATCH, TOKENS, HIDDEN]);

    // Zeroed conditioning projection: every gate is zero, so the block is the identity
    let expected: Vec<f32> = x.into_data().to_vec().unwrap();
    let actual: Vec<f32> = result.clone().into_data().to_vec().unwrap();
    assert_eq!(actual, expected);

    let final_layer = FinalLayerConfig::new(HIDDEN, 8, 4)
        .init::<TestBackend>(&device)
        .unwrap();
    let out = final_layer.forward(result, c);
    assert_eq!(out.dims(), [BATCH, TOKENS, 256]);

    let out: Vec<f32> = out.into_data().to_vec().unwrap();
    assert!(out.iter().all(|v| *v == 0.0));
}
