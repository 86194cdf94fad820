//! burn-dit CLI
//!
//! Smoke tests for the DiT module stack on the CPU backend.
//!
//! Supports:
//! - Per-module shape report with random inputs
//! - Full-model forward (and guided forward) over a DiT preset

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use burn::prelude::*;
use burn::tensor::Distribution;
use burn_dit::{DiTBlockConfig, DiTConfig, FinalLayerConfig};
use burn_dit_core::attention::AttentionConfig;
use burn_dit_core::embedding::{LabelEmbedderConfig, TimestepEmbedderConfig};
use burn_ndarray::NdArray;
use clap::{Parser, Subcommand};

type CpuBackend = NdArray<f32>;

#[derive(Parser)]
#[command(name = "burn-dit")]
#[command(about = "Diffusion Transformer building blocks in pure Rust")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every module once on random inputs and print output shapes
    Shapes {
        #[arg(long, default_value_t = 3)]
        batch: usize,

        /// Number of patch tokens
        #[arg(long, default_value_t = 784)]
        tokens: usize,

        #[arg(long, default_value_t = 128)]
        hidden: usize,

        #[arg(long, default_value_t = 2)]
        heads: usize,

        /// Sinusoidal timestep feature size
        #[arg(long, default_value_t = 256)]
        frequency_size: usize,

        #[arg(long, default_value_t = 1000)]
        num_classes: usize,

        #[arg(long, default_value_t = 0.1)]
        class_dropout: f64,

        #[arg(long, default_value_t = 1.0)]
        mlp_ratio: f64,

        #[arg(long, default_value_t = 8)]
        patch_size: usize,

        #[arg(long, default_value_t = 4)]
        out_channels: usize,
    },

    /// Build a full DiT and run one forward pass
    Model {
        /// Preset name, e.g. "XL/2", "b-4", "tiny"
        #[arg(short, long, default_value = "tiny")]
        preset: String,

        /// JSON config file (overrides --preset)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Latent height/width (overrides the config)
        #[arg(long)]
        input_size: Option<usize>,

        #[arg(short, long, default_value_t = 2)]
        batch: usize,

        /// Also run a classifier-free guidance forward with this scale
        #[arg(long)]
        cfg_scale: Option<f64>,

        /// Write the resolved config to this path
        #[arg(long)]
        save_config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Shapes {
            batch,
            tokens,
            hidden,
            heads,
            frequency_size,
            num_classes,
            class_dropout,
            mlp_ratio,
            patch_size,
            out_channels,
        } => run_shapes(ShapeArgs {
            batch,
            tokens,
            hidden,
            heads,
            frequency_size,
            num_classes,
            class_dropout,
            mlp_ratio,
            patch_size,
            out_channels,
        }),

        Commands::Model {
            preset,
            config,
            input_size,
            batch,
            cfg_scale,
            save_config,
        } => {
            let mut model_config = match config {
                Some(path) => DiTConfig::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => DiTConfig::from_name(&preset)
                    .with_context(|| format!("Unknown preset: {preset}"))?,
            };
            if let Some(size) = input_size {
                model_config = model_config.with_input_size(size);
            }
            if let Some(path) = save_config {
                model_config
                    .save(&path)
                    .with_context(|| format!("Failed to save config {}", path.display()))?;
                tracing::info!("Wrote config to {}", path.display());
            }
            run_model(&model_config, batch, cfg_scale)
        }
    }
}

struct ShapeArgs {
    batch: usize,
    tokens: usize,
    hidden: usize,
    heads: usize,
    frequency_size: usize,
    num_classes: usize,
    class_dropout: f64,
    mlp_ratio: f64,
    patch_size: usize,
    out_channels: usize,
}

fn run_shapes(args: ShapeArgs) -> Result<()> {
    if args.num_classes == 0 {
        bail!("--num-classes must be at least 1");
    }
    let device = Default::default();

    let t_embedder = TimestepEmbedderConfig::new(args.hidden, args.frequency_size, true)
        .init::<CpuBackend>(&device)?;
    let t = Tensor::random([args.batch], Distribution::Uniform(0.0, 1.0), &device);
    let t_emb = t_embedder.forward(t);
    println!("Timestep embedder:  {:?}", t_emb.dims());

    let y_embedder = LabelEmbedderConfig::new(args.num_classes, args.hidden, args.class_dropout)
        .init::<CpuBackend>(&device)?;
    let y = Tensor::<CpuBackend, 1, Int>::random(
        [args.batch],
        Distribution::Uniform(0.0, args.num_classes as f64),
        &device,
    );
    let y_emb = y_embedder.forward(y);
    println!("Label embedder:     {:?}", y_emb.dims());

    let c = t_emb + y_emb;

    let attention = AttentionConfig::new(args.hidden, args.heads).init::<CpuBackend>(&device)?;
    let x = Tensor::random(
        [args.batch, args.tokens, args.hidden],
        Distribution::Uniform(0.0, 1.0),
        &device,
    );
    let (context, weights) = attention.self_attention(x.clone(), None);
    println!("Attention context:  {:?}", context.dims());
    println!("Attention weights:  {:?}", weights.dims());

    let block = DiTBlockConfig::new(args.hidden, args.heads)
        .with_mlp_ratio(args.mlp_ratio)
        .with_perceptron_layernorm(true)
        .init::<CpuBackend>(&device)?;
    tracing::info!(params = block.num_params(), "DiT block");
    let result = block.forward(x, c.clone());
    println!("DiT block:          {:?}", result.dims());

    let final_layer = FinalLayerConfig::new(args.hidden, args.patch_size, args.out_channels)
        .init::<CpuBackend>(&device)?;
    let out = final_layer.forward(result, c);
    println!("Final layer:        {:?}", out.dims());

    Ok(())
}

fn run_model(config: &DiTConfig, batch: usize, cfg_scale: Option<f64>) -> Result<()> {
    let device = Default::default();

    tracing::info!(
        depth = config.depth,
        hidden_size = config.hidden_size,
        patch_size = config.patch_size,
        input_size = config.input_size,
        "Building DiT"
    );
    let model = config
        .init::<CpuBackend>(&device)
        .context("Failed to build model")?;
    println!("Parameters: {}", model.num_params());

    let size = config.input_size;
    let x = Tensor::random(
        [batch, config.in_channels, size, size],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    let t = Tensor::random([batch], Distribution::Uniform(0.0, 1000.0), &device);
    let y = Tensor::<CpuBackend, 1, Int>::random(
        [batch],
        Distribution::Uniform(0.0, config.num_classes as f64),
        &device,
    );

    let start = std::time::Instant::now();
    let out = model.forward(x.clone(), t.clone(), y.clone());
    tracing::info!("forward: {:?}", start.elapsed());
    println!("Prediction: {:?}", out.dims());

    if let Some(scale) = cfg_scale {
        if !model.y_embedder.has_null_class() {
            bail!("Guidance needs class_dropout_prob > 0 so the model has a null class");
        }
        // Second half of the batch runs unconditionally
        let half = batch / 2;
        let null = model.null_class() as i64;
        let labels: Vec<i64> = y
            .into_data()
            .convert::<i64>()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("Failed to read labels: {e:?}"))?;
        let labels: Vec<i64> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| if i < half { *label } else { null })
            .collect();
        let y = Tensor::<CpuBackend, 1, Int>::from_ints(labels.as_slice(), &device);

        let guided = model
            .forward_with_cfg(x, t, y, scale)
            .context("Guided forward failed")?;
        println!("Guided prediction (scale {scale}): {:?}", guided.dims());
    }

    Ok(())
}
