//! Post-construction weight initialization
//!
//! adaLN-Zero relies on specific projections starting at exactly zero. These
//! helpers are applied after a module is built, replacing whatever the
//! layer's initializer produced. Every other token-facing projection starts
//! from [`xavier_linear`].

use burn::module::Param;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::prelude::*;

/// Builds a linear layer with Xavier-uniform weights and a zero bias
///
/// Weights are drawn from `U(-a, a)` with `a = sqrt(6 / (fan_in + fan_out))`.
pub fn xavier_linear<B: Backend>(config: LinearConfig, device: &B::Device) -> Linear<B> {
    let linear = config
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device);
    fill_bias(linear, 0.0)
}

/// Sets a linear layer's weight and bias to zero
pub fn zero_linear<B: Backend>(mut linear: Linear<B>) -> Linear<B> {
    linear.weight = Param::from_tensor(linear.weight.val().zeros_like());
    linear.bias = linear
        .bias
        .map(|bias| Param::from_tensor(bias.val().zeros_like()));
    linear
}

/// Sets every element of a linear layer's bias to `value`, if it has one
pub fn fill_bias<B: Backend>(mut linear: Linear<B>, value: f32) -> Linear<B> {
    linear.bias = linear
        .bias
        .map(|bias| Param::from_tensor(bias.val().zeros_like() + value));
    linear
}
