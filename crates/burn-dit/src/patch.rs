//! Patchify / unpatchify and fixed position embeddings
//!
//! Latents `[B, C, H, W]` are cut into non-overlapping `p x p` patches,
//! flattened and linearly projected to tokens. The model output is folded back
//! with [`unpatchify`], which expects each token laid out as `(p, p, C)`.

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use burn_dit_core::error::DitError;
use burn_dit_core::init::xavier_linear;

/// Patchify: Convert latents to a sequence of patch embeddings
///
/// Equivalent to a `p x p` convolution with stride `p`.
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    /// Projection from flattened patch to hidden dim
    pub proj: Linear<B>,
    /// Patch size
    #[module(skip)]
    pub patch_size: usize,
    /// Number of input channels
    #[module(skip)]
    pub in_channels: usize,
}

/// Shape of the patchifying projection
#[derive(Debug, Clone)]
pub struct PatchEmbedConfig {
    /// Side of the square patch in latent pixels
    pub patch_size: usize,
    /// Latent channels
    pub in_channels: usize,
    /// Token width produced per patch
    pub hidden_size: usize,
}

impl PatchEmbedConfig {
    pub fn new(patch_size: usize, in_channels: usize, hidden_size: usize) -> Self {
        Self {
            patch_size,
            in_channels,
            hidden_size,
        }
    }

    /// Flattened patch length `p * p * in_channels`
    pub fn patch_dim(&self) -> usize {
        self.patch_size * self.patch_size * self.in_channels
    }

    /// Builds the projection with Xavier-uniform weights, treating the
    /// `p x p` kernel as a flat linear map
    ///
    /// Fails when any size is zero.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<PatchEmbed<B>, DitError> {
        if self.patch_size == 0 || self.in_channels == 0 || self.hidden_size == 0 {
            return Err(DitError::InvalidConfig(format!(
                "patch embedding sizes must be non-zero, got patch {} channels {} hidden {}",
                self.patch_size, self.in_channels, self.hidden_size
            )));
        }

        Ok(PatchEmbed {
            proj: xavier_linear(LinearConfig::new(self.patch_dim(), self.hidden_size), device),
            patch_size: self.patch_size,
            in_channels: self.in_channels,
        })
    }
}

impl<B: Backend> PatchEmbed<B> {
    /// Convert latents to a patch sequence
    ///
    /// # Arguments
    ///
    /// * `x` - Latents [batch, channels, height, width]
    ///
    /// # Returns
    ///
    /// Patch embeddings [batch, num_patches, hidden_size], row-major over the
    /// patch grid
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, _channels, height, width] = x.dims();
        let p = self.patch_size;
        let ph = height / p;
        let pw = width / p;

        // [B, C, ph, p, pw, p] -> [B, ph, pw, C, p, p]
        let x = x
            .reshape([batch, self.in_channels, ph, p, pw, p])
            .permute([0, 2, 4, 1, 3, 5]);
        let x = x.reshape([batch, ph * pw, self.in_channels * p * p]);

        self.proj.forward(x)
    }
}

/// Unpatchify: fold flattened patches back into latents
///
/// # Arguments
///
/// * `x` - Patches [batch, ph * pw, p * p * channels], each laid out `(p, p, C)`
///
/// # Returns
///
/// Latents [batch, channels, height, width]
pub fn unpatchify<B: Backend>(
    x: Tensor<B, 3>,
    patch_size: usize,
    height: usize,
    width: usize,
    channels: usize,
) -> Tensor<B, 4> {
    let [batch, _num_patches, _] = x.dims();
    let ph = height / patch_size;
    let pw = width / patch_size;

    // [B, ph, pw, p, p, C] -> [B, C, ph, p, pw, p]
    let x = x
        .reshape([batch, ph, pw, patch_size, patch_size, channels])
        .permute([0, 5, 1, 3, 2, 4]);
    x.reshape([batch, channels, height, width])
}

/// 1D sin-cos embedding of positions: `[sin(pos * w), cos(pos * w)]`
/// with `w_i = 1 / 10000^(i / (dim / 2))`
fn sincos_1d(dim: usize, pos: f64, out: &mut Vec<f32>) {
    let half = dim / 2;
    let omegas = (0..half).map(|i| 1.0 / 10_000f64.powf(i as f64 / half as f64));
    out.extend(omegas.clone().map(|w| (pos * w).sin() as f32));
    out.extend(omegas.map(|w| (pos * w).cos() as f32));
}

/// Fixed 2D sin-cos position embedding for a square patch grid
///
/// For the token at grid row `i`, column `j`, the first half of the features
/// encodes `j` and the second half encodes `i`. `embed_dim` must be a
/// multiple of 4.
///
/// # Returns
///
/// Position embedding [1, grid_size², embed_dim]
pub fn sincos_pos_embed_2d<B: Backend>(
    embed_dim: usize,
    grid_size: usize,
    device: &B::Device,
) -> Tensor<B, 3> {
    let mut data = Vec::with_capacity(grid_size * grid_size * embed_dim);
    for i in 0..grid_size {
        for j in 0..grid_size {
            sincos_1d(embed_dim / 2, j as f64, &mut data);
            sincos_1d(embed_dim / 2, i as f64, &mut data);
        }
    }

    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([
        1,
        grid_size * grid_size,
        embed_dim,
    ])
}
