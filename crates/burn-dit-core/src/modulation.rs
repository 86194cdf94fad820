//! adaLN modulation helpers
//!
//! A conditioning projection emits `N * hidden` values per sample; these are
//! split into `N` vectors of `[batch, 1, hidden]` so they broadcast over the
//! token axis.

use burn::prelude::*;

/// Affine modulation: `x * (1 + scale) + shift`
///
/// `shift` and `scale` are `[batch, 1, hidden]` and broadcast over tokens.
pub fn modulate<B: Backend>(x: Tensor<B, 3>, shift: Tensor<B, 3>, scale: Tensor<B, 3>) -> Tensor<B, 3> {
    x * (scale + 1.0) + shift
}

/// Splits `[batch, N * hidden]` modulation parameters into `N` chunks of
/// `[batch, 1, hidden]`, in order.
pub fn split_modulation<B: Backend, const N: usize>(params: Tensor<B, 2>) -> [Tensor<B, 3>; N] {
    let [batch, width] = params.dims();
    let hidden = width / N;
    let params = params.reshape([batch, N, hidden]);

    core::array::from_fn(|i| params.clone().slice([0..batch, i..i + 1, 0..hidden]))
}
