//! Class-conditional DiT
//!
//! # Architecture Overview
//!
//! ```text
//! latents [B, C, H, W] --patchify--> tokens + fixed 2D pos embed
//! t [B] --TimestepEmbedder--+
//!                           +--> c [B, hidden]
//! y [B] --LabelEmbedder-----+
//!        ↓
//! [DiT blocks, each modulated by c]
//!        ↓
//! FinalLayer --unpatchify--> prediction [B, out_C, H, W]
//! ```

use burn::prelude::*;

use burn_dit_core::embedding::{
    LabelEmbedder, LabelEmbedderConfig, TimestepEmbedder, TimestepEmbedderConfig,
};
use burn_dit_core::error::DitError;

use crate::block::{DiTBlock, DiTBlockConfig};
use crate::config::DiTConfig;
use crate::final_layer::{FinalLayer, FinalLayerConfig};
use crate::patch::{PatchEmbed, PatchEmbedConfig, sincos_pos_embed_2d, unpatchify};

/// Diffusion Transformer
#[derive(Module, Debug)]
pub struct DiT<B: Backend> {
    pub patch_embed: PatchEmbed<B>,
    pub t_embedder: TimestepEmbedder<B>,
    pub y_embedder: LabelEmbedder<B>,
    /// Fixed sin-cos position embedding [1, num_patches, hidden]
    pub pos_embed: Tensor<B, 3>,
    pub blocks: Vec<DiTBlock<B>>,
    pub final_layer: FinalLayer<B>,
    #[module(skip)]
    pub patch_size: usize,
    #[module(skip)]
    pub out_channels: usize,
    #[module(skip)]
    pub guidance_channels: usize,
}

impl DiTConfig {
    /// Initialize the model
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DiT<B>, DitError> {
        self.validate()?;

        let patch_embed =
            PatchEmbedConfig::new(self.patch_size, self.in_channels, self.hidden_size)
                .init(device)?;
        let t_embedder =
            TimestepEmbedderConfig::new(self.hidden_size, self.frequency_embedding_size, true)
                .init(device)?;
        let y_embedder =
            LabelEmbedderConfig::new(self.num_classes, self.hidden_size, self.class_dropout_prob)
                .init(device)?;

        let block_config = DiTBlockConfig::new(self.hidden_size, self.num_heads)
            .with_mlp_ratio(self.mlp_ratio);
        let blocks = (0..self.depth)
            .map(|_| block_config.init(device))
            .collect::<Result<Vec<_>, _>>()?;

        let final_layer =
            FinalLayerConfig::new(self.hidden_size, self.patch_size, self.out_channels())
                .init(device)?;

        let model = DiT {
            patch_embed,
            t_embedder,
            y_embedder,
            pos_embed: sincos_pos_embed_2d(self.hidden_size, self.grid_size(), device),
            blocks,
            final_layer,
            patch_size: self.patch_size,
            out_channels: self.out_channels(),
            guidance_channels: self.guidance_channels.min(self.out_channels()),
        };

        tracing::debug!(
            depth = self.depth,
            hidden_size = self.hidden_size,
            num_heads = self.num_heads,
            num_patches = self.num_patches(),
            params = model.num_params(),
            "initialized DiT"
        );

        Ok(model)
    }
}

impl<B: Backend> DiT<B> {
    /// Index of the null class used for unconditional predictions
    pub fn null_class(&self) -> usize {
        self.y_embedder.null_class()
    }

    /// Conditioning vector `t_emb + y_emb` [batch, hidden]
    ///
    /// Labels are randomly dropped only on autodiff (training) backends.
    pub fn conditioning(&self, t: Tensor<B, 1>, y: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        let y_emb = if B::ad_enabled() {
            self.y_embedder.forward(y)
        } else {
            self.y_embedder.embed(y)
        };
        self.t_embedder.forward(t) + y_emb
    }

    /// Runs the block stack on tokens with a precomputed conditioning vector
    ///
    /// # Returns
    ///
    /// Flattened patches [batch, num_patches, patch_size² * out_channels]
    pub fn forward_tokens(&self, x: Tensor<B, 3>, c: Tensor<B, 2>) -> Tensor<B, 3> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x, c.clone());
        }
        self.final_layer.forward(x, c)
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Noisy latents [batch, in_channels, height, width]
    /// * `t` - Diffusion timesteps [batch]
    /// * `y` - Class labels [batch]
    ///
    /// # Returns
    ///
    /// Prediction [batch, out_channels, height, width]
    pub fn forward(&self, x: Tensor<B, 4>, t: Tensor<B, 1>, y: Tensor<B, 1, Int>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();

        let tokens = self.patch_embed.forward(x) + self.pos_embed.clone();
        let c = self.conditioning(t, y);
        let out = self.forward_tokens(tokens, c);

        unpatchify(out, self.patch_size, height, width, self.out_channels)
    }

    /// Forward pass with classifier-free guidance
    ///
    /// The first half of the batch is run twice: once with the labels of the
    /// first half of `y`, once with those of the second half (normally the
    /// null class). On the leading `guidance_channels` output channels the two
    /// are combined as `uncond + scale * (cond - uncond)`; the remaining
    /// channels are passed through. The guided result is duplicated so the
    /// output batch matches the input.
    pub fn forward_with_cfg(
        &self,
        x: Tensor<B, 4>,
        t: Tensor<B, 1>,
        y: Tensor<B, 1, Int>,
        cfg_scale: f64,
    ) -> Result<Tensor<B, 4>, DitError> {
        let [batch, channels, height, width] = x.dims();
        if batch % 2 != 0 {
            return Err(DitError::InvalidConfig(format!(
                "classifier-free guidance needs an even batch, got {batch}"
            )));
        }
        let half = batch / 2;

        let x_half = x.slice([0..half, 0..channels, 0..height, 0..width]);
        let combined = Tensor::cat(vec![x_half.clone(), x_half], 0);
        let out = self.forward(combined, t, y);

        let g = self.guidance_channels;
        let eps = out
            .clone()
            .slice([0..batch, 0..g, 0..height, 0..width]);
        let cond = eps.clone().slice([0..half, 0..g, 0..height, 0..width]);
        let uncond = eps.slice([half..batch, 0..g, 0..height, 0..width]);
        let guided = uncond.clone() + (cond - uncond) * cfg_scale;
        let guided = Tensor::cat(vec![guided.clone(), guided], 0);

        if g == self.out_channels {
            return Ok(guided);
        }
        let rest = out.slice([0..batch, g..self.out_channels, 0..height, 0..width]);
        Ok(Tensor::cat(vec![guided, rest], 1))
    }
}
