//! Core Building Blocks for Diffusion Transformers
//!
//! This crate provides the leaf layers that a DiT block is assembled from.
//! Everything here is a plain tensor transform over burn modules; the
//! conditioned block, final layer and full model live in `burn-dit`.
//!
//! # Modules
//!
//! ## Conditioning
//!
//! - [`embedding`] - Sinusoidal timestep embedder, class-label embedder with
//!   label dropout for classifier-free guidance
//! - [`modulation`] - adaLN shift/scale modulation and parameter splitting
//!
//! ## Transformer Layers
//!
//! - [`attention`] - Multi-head scaled dot-product attention returning weights
//! - [`perceptron`] - Two-layer GELU feed-forward network
//! - [`layernorm`] - Layer normalization with optional affine parameters
//!
//! ## Utilities
//!
//! - [`init`] - Xavier-uniform projections and post-construction zero initialization
//! - [`error`] - Construction-time error type
//!
//! # Example
//!
//! ```ignore
//! use burn_dit_core::embedding::{LabelEmbedderConfig, TimestepEmbedderConfig};
//!
//! let t_embedder = TimestepEmbedderConfig::new(hidden, 256, true).init(&device)?;
//! let y_embedder = LabelEmbedderConfig::new(1000, hidden, 0.1).init(&device)?;
//!
//! // Conditioning vector [batch, hidden]
//! let c = t_embedder.forward(t) + y_embedder.forward(y);
//! ```

pub mod attention;
pub mod embedding;
pub mod error;
pub mod init;
pub mod layernorm;
pub mod modulation;
pub mod perceptron;

pub use attention::{Attention, AttentionConfig, scaled_dot_product};
pub use embedding::{
    LabelEmbedder, LabelEmbedderConfig, TimestepEmbedder, TimestepEmbedderConfig,
    frequency_embedding,
};
pub use error::DitError;
pub use layernorm::{LayerNorm, LayerNormConfig};
pub use modulation::{modulate, split_modulation};
pub use perceptron::{AttentionPerceptron, AttentionPerceptronConfig, LayerPair};
