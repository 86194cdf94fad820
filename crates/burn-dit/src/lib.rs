//! Diffusion Transformer (DiT)
//!
//! This crate assembles the layers from `burn-dit-core` into the
//! class-conditional DiT of Peebles & Xie.
//!
//! # Architecture
//!
//! DiT replaces the convolutional U-Net of a diffusion model with a stack of
//! transformer blocks over latent patches:
//! - Timestep and class-label embeddings are summed into one conditioning vector
//! - Each block is modulated by adaptive layer norm (adaLN-Zero); its
//!   conditioning projection starts at zero so the block starts as identity
//! - The final layer is zero-initialized, so a fresh model predicts zeros
//! - Bidirectional attention (no causal mask)
//!
//! # References
//!
//! - [Scalable Diffusion Models with Transformers](https://arxiv.org/abs/2212.09748)

pub mod block;
pub mod config;
pub mod final_layer;
pub mod model;
pub mod patch;

pub use block::{DiTBlock, DiTBlockConfig};
pub use config::{ConfigFileError, DiTConfig};
pub use final_layer::{FinalLayer, FinalLayerConfig};
pub use model::DiT;
pub use patch::{PatchEmbed, PatchEmbedConfig, sincos_pos_embed_2d, unpatchify};
