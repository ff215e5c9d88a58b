//! Assemble a pretrained [`Plbert`] from a training log directory.
//!
//! ```text
//! <log_dir>/config.yml  → model_params → AlbertConfig → fresh model
//! <log_dir>/step_N.t7   → net → remap keys → non-strict load
//! ```
//!
//! # Example
//!
//! ```no_run
//! use plbert_rs::loader::load_plbert;
//!
//! let plbert = load_plbert("Utils/PLBERT", None, None)?;
//! # Ok::<(), plbert_rs::Error>(())
//! ```

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

use crate::checkpoint::{self, LoadReport};
use crate::config::{CONFIG_FILE_NAME, PlbertConfig};
use crate::model::albert;
use crate::model::plbert::Plbert;
use crate::Result;

/// A loaded model plus where it came from.
#[derive(Debug)]
pub struct LoadedPlbert {
    pub model: Plbert,
    pub config: PlbertConfig,
    pub checkpoint_path: PathBuf,
    pub report: LoadReport,
}

/// Builder for loading PLBERT with non-default paths, device or dtype.
#[derive(Debug, Clone)]
pub struct PlbertLoader {
    log_dir: PathBuf,
    config_path: Option<PathBuf>,
    checkpoint_path: Option<PathBuf>,
    device: Device,
    dtype: DType,
}

impl PlbertLoader {
    /// Load from `log_dir` on the CPU in F32.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            config_path: None,
            checkpoint_path: None,
            device: Device::Cpu,
            dtype: DType::F32,
        }
    }

    /// Config file to use instead of `<log_dir>/config.yml`.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Checkpoint to use instead of the highest-step `step_<N>.t7`.
    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Device the model parameters live on. The checkpoint itself is always
    /// read onto the CPU first.
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn load(&self) -> Result<LoadedPlbert> {
        let config_path = self
            .config_path
            .clone()
            .unwrap_or_else(|| self.log_dir.join(CONFIG_FILE_NAME));
        tracing::info!(path = %config_path.display(), "reading PLBERT config");
        let config = PlbertConfig::from_file(&config_path)?;
        config.model_params.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, self.dtype, &self.device);
        let model = Plbert::new(&config.model_params, vb)?;
        albert::zero_padding_embedding(&varmap, config.model_params.pad_token_id)?;

        let checkpoint_path = match &self.checkpoint_path {
            Some(path) => path.clone(),
            None => checkpoint::find_latest_checkpoint(&self.log_dir)?,
        };
        tracing::info!(path = %checkpoint_path.display(), "loading PLBERT checkpoint");
        let raw = checkpoint::read_checkpoint(&checkpoint_path)?;
        let state_dict = checkpoint::remap_state_dict(raw);
        let report = checkpoint::load_state_dict(&varmap, &state_dict)?;

        tracing::info!(
            loaded = report.loaded.len(),
            missing = report.missing.len(),
            unexpected = report.unexpected.len(),
            mismatched = report.mismatched.len(),
            "PLBERT weights loaded"
        );
        if !report.missing.is_empty() {
            tracing::debug!(names = ?report.missing, "parameters left at initialization");
        }
        if !report.unexpected.is_empty() {
            tracing::debug!(names = ?report.unexpected, "ignored checkpoint entries");
        }

        Ok(LoadedPlbert {
            model,
            config,
            checkpoint_path,
            report,
        })
    }
}

/// Load PLBERT from `log_dir` on the CPU in F32.
///
/// - `config_path`: defaults to `<log_dir>/config.yml`
/// - `checkpoint_path`: defaults to the `step_<N>.t7` with the highest `N`
pub fn load_plbert(
    log_dir: impl AsRef<Path>,
    config_path: Option<&Path>,
    checkpoint_path: Option<&Path>,
) -> Result<Plbert> {
    let mut loader = PlbertLoader::new(log_dir.as_ref());
    if let Some(path) = config_path {
        loader = loader.config_path(path);
    }
    if let Some(path) = checkpoint_path {
        loader = loader.checkpoint_path(path);
    }
    Ok(loader.load()?.model)
}
