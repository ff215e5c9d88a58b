//! PLBERT CLI — load a checkpoint directory and encode one token sequence.
//!
//! Reads `<LOG_DIR>/config.yml` and the latest `step_<N>.t7` (or the paths
//! given by --config / --checkpoint), runs one forward pass and prints a
//! one-line JSON summary to stdout:
//!
//! ```json
//! {"checkpoint":"Utils/PLBERT/step_1000000.t7","loaded":27,"missing":0,"unexpected":4,"mismatched":0,"output_shape":[1,5,768]}
//! ```

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use clap::Parser;
use plbert_rs::PlbertLoader;

#[derive(Parser, Debug)]
#[command(
    name = "plbert",
    about = "Load a PLBERT checkpoint and encode a token sequence"
)]
struct Args {
    /// Training log directory holding config.yml and step_<N>.t7 files.
    log_dir: PathBuf,

    /// Config file to use instead of <LOG_DIR>/config.yml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Checkpoint to use instead of the highest step_<N>.t7.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Comma-separated token ids to encode.
    #[arg(long, value_delimiter = ',', default_value = "0")]
    tokens: Vec<u32>,

    /// Stay on the CPU even when CUDA is available.
    #[arg(long)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.tokens.is_empty() {
        anyhow::bail!("--tokens must contain at least one id");
    }

    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    tracing::info!("Using device: {:?}", device);

    let mut loader = PlbertLoader::new(&args.log_dir)
        .device(device.clone())
        .dtype(DType::F32);
    if let Some(config) = &args.config {
        loader = loader.config_path(config);
    }
    if let Some(checkpoint) = &args.checkpoint {
        loader = loader.checkpoint_path(checkpoint);
    }

    let loaded = loader
        .load()
        .map_err(|e| anyhow::anyhow!("failed to load PLBERT: {e}"))?;

    let input_ids = Tensor::new(args.tokens.as_slice(), &device)?.unsqueeze(0)?;
    let hidden = loaded
        .model
        .forward(&input_ids, None, None)
        .map_err(|e| anyhow::anyhow!("forward pass failed: {e}"))?;

    let summary = serde_json::json!({
        "checkpoint": loaded.checkpoint_path.display().to_string(),
        "loaded": loaded.report.loaded.len(),
        "missing": loaded.report.missing.len(),
        "unexpected": loaded.report.unexpected.len(),
        "mismatched": loaded.report.mismatched.len(),
        "output_shape": hidden.dims(),
    });
    println!("{summary}");

    Ok(())
}
