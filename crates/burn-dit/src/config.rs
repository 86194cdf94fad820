//! DiT model configuration
//!
//! Presets follow the DiT family naming `<size>/<patch>`: S, B, L and XL
//! backbones with patch sizes 2, 4 and 8.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use burn_dit_core::error::DitError;

#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] DitError),
}

/// Full DiT model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiTConfig {
    /// Latent height and width
    pub input_size: usize,
    pub patch_size: usize,
    /// Latent channels (4 for SD VAE latents)
    pub in_channels: usize,
    pub hidden_size: usize,
    /// Number of DiT blocks
    pub depth: usize,
    pub num_heads: usize,
    pub mlp_ratio: f64,
    /// Label dropout for classifier-free guidance
    pub class_dropout_prob: f64,
    pub num_classes: usize,
    /// Predict variance as well as noise (doubles output channels)
    pub learn_sigma: bool,
    #[serde(default = "default_frequency_embedding_size")]
    pub frequency_embedding_size: usize,
    /// Leading output channels that classifier-free guidance is applied to
    #[serde(default = "default_guidance_channels")]
    pub guidance_channels: usize,
}

fn default_frequency_embedding_size() -> usize {
    256
}

fn default_guidance_channels() -> usize {
    3
}

impl DiTConfig {
    fn preset(depth: usize, hidden_size: usize, patch_size: usize, num_heads: usize) -> Self {
        Self {
            input_size: 32,
            patch_size,
            in_channels: 4,
            hidden_size,
            depth,
            num_heads,
            mlp_ratio: 4.0,
            class_dropout_prob: 0.1,
            num_classes: 1000,
            learn_sigma: true,
            frequency_embedding_size: default_frequency_embedding_size(),
            guidance_channels: default_guidance_channels(),
        }
    }

    pub fn xl_2() -> Self {
        Self::preset(28, 1152, 2, 16)
    }

    pub fn xl_4() -> Self {
        Self::preset(28, 1152, 4, 16)
    }

    pub fn xl_8() -> Self {
        Self::preset(28, 1152, 8, 16)
    }

    pub fn l_2() -> Self {
        Self::preset(24, 1024, 2, 16)
    }

    pub fn l_4() -> Self {
        Self::preset(24, 1024, 4, 16)
    }

    pub fn l_8() -> Self {
        Self::preset(24, 1024, 8, 16)
    }

    pub fn b_2() -> Self {
        Self::preset(12, 768, 2, 12)
    }

    pub fn b_4() -> Self {
        Self::preset(12, 768, 4, 12)
    }

    pub fn b_8() -> Self {
        Self::preset(12, 768, 8, 12)
    }

    pub fn s_2() -> Self {
        Self::preset(12, 384, 2, 6)
    }

    pub fn s_4() -> Self {
        Self::preset(12, 384, 4, 6)
    }

    pub fn s_8() -> Self {
        Self::preset(12, 384, 8, 6)
    }

    /// Tiny model for testing
    pub fn tiny() -> Self {
        Self {
            input_size: 8,
            patch_size: 2,
            in_channels: 4,
            hidden_size: 64,
            depth: 2,
            num_heads: 4,
            mlp_ratio: 2.0,
            class_dropout_prob: 0.1,
            num_classes: 10,
            learn_sigma: true,
            frequency_embedding_size: 32,
            guidance_channels: 3,
        }
    }

    /// Looks up a preset by its DiT name, e.g. `"DiT-XL/2"` or `"s-8"`
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim_start_matches("DiT-").to_ascii_lowercase().replace('/', "-");
        let config = match name.as_str() {
            "xl-2" => Self::xl_2(),
            "xl-4" => Self::xl_4(),
            "xl-8" => Self::xl_8(),
            "l-2" => Self::l_2(),
            "l-4" => Self::l_4(),
            "l-8" => Self::l_8(),
            "b-2" => Self::b_2(),
            "b-4" => Self::b_4(),
            "b-8" => Self::b_8(),
            "s-2" => Self::s_2(),
            "s-4" => Self::s_4(),
            "s-8" => Self::s_8(),
            "tiny" => Self::tiny(),
            _ => return None,
        };
        Some(config)
    }

    pub fn with_input_size(mut self, input_size: usize) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_class_dropout_prob(mut self, prob: f64) -> Self {
        self.class_dropout_prob = prob;
        self
    }

    pub fn with_learn_sigma(mut self, learn_sigma: bool) -> Self {
        self.learn_sigma = learn_sigma;
        self
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    pub fn out_channels(&self) -> usize {
        if self.learn_sigma {
            self.in_channels * 2
        } else {
            self.in_channels
        }
    }

    /// Patches per side
    pub fn grid_size(&self) -> usize {
        self.input_size / self.patch_size
    }

    pub fn num_patches(&self) -> usize {
        self.grid_size() * self.grid_size()
    }

    /// Checks the constraints the model relies on beyond per-layer checks
    pub fn validate(&self) -> Result<(), DitError> {
        if self.patch_size == 0 || self.input_size % self.patch_size != 0 {
            return Err(DitError::InvalidConfig(format!(
                "input size {} is not divisible by patch size {}",
                self.input_size, self.patch_size
            )));
        }
        if self.hidden_size % 4 != 0 {
            return Err(DitError::InvalidConfig(format!(
                "hidden size {} must be a multiple of 4 for 2D position embeddings",
                self.hidden_size
            )));
        }
        if self.depth == 0 {
            return Err(DitError::InvalidConfig("depth must be at least 1".into()));
        }
        Ok(())
    }

    /// Reads a JSON config
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigFileError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
