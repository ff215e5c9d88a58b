//! PLBERT configuration.
//!
//! The training run writes a `config.yml` next to its checkpoints. Only the
//! `model_params` mapping matters for loading; it holds the ALBERT
//! hyperparameters. Keys missing from `model_params` fall back to the
//! Hugging Face `AlbertConfig` defaults.
//!
//! ```yaml
//! log_dir: "Checkpoint"
//! batch_size: 192
//! model_params:
//!   vocab_size: 178
//!   hidden_size: 768
//!   num_attention_heads: 12
//!   intermediate_size: 2048
//!   max_position_embeddings: 512
//!   num_hidden_layers: 12
//!   dropout: 0.1
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use candle_nn::Activation;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default config file name inside a PLBERT log directory.
pub const CONFIG_FILE_NAME: &str = "config.yml";

/// ALBERT architecture hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbertConfig {
    // --- Embeddings ---
    pub vocab_size: usize,
    pub embedding_size: usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub position_embedding_type: String,

    // --- Transformer ---
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_hidden_groups: usize,
    pub inner_group_num: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: Activation,
    pub layer_norm_eps: f64,

    // --- Training-time only ---
    pub hidden_dropout_prob: f64,
    pub attention_probs_dropout_prob: f64,
    pub initializer_range: f64,

    // --- Tokens ---
    pub pad_token_id: u32,
    pub bos_token_id: u32,
    pub eos_token_id: u32,

    /// Also return every intermediate hidden state from the base model.
    pub output_hidden_states: bool,

    /// Keys the architecture does not use (e.g. PLBERT's `dropout`).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for AlbertConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30000,
            embedding_size: 128,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            position_embedding_type: "absolute".to_string(),
            hidden_size: 4096,
            num_hidden_layers: 12,
            num_hidden_groups: 1,
            inner_group_num: 1,
            num_attention_heads: 64,
            intermediate_size: 16384,
            hidden_act: Activation::NewGelu,
            layer_norm_eps: 1e-12,
            hidden_dropout_prob: 0.0,
            attention_probs_dropout_prob: 0.0,
            initializer_range: 0.02,
            pad_token_id: 0,
            bos_token_id: 2,
            eos_token_id: 3,
            output_hidden_states: false,
            extra: BTreeMap::new(),
        }
    }
}

impl AlbertConfig {
    /// Per-head dimension (hidden_size / num_attention_heads).
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Number of transformer passes that share one layer group.
    pub fn layers_per_group(&self) -> f64 {
        self.num_hidden_layers as f64 / self.num_hidden_groups as f64
    }

    /// Reject hyperparameters the architecture cannot be built with.
    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::Config(format!(
                "hidden_size ({}) is not a multiple of num_attention_heads ({})",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.num_hidden_groups == 0 {
            return Err(Error::Config("num_hidden_groups must be at least 1".to_string()));
        }
        if self.position_embedding_type != "absolute" {
            return Err(Error::Config(format!(
                "unsupported position_embedding_type '{}'",
                self.position_embedding_type
            )));
        }
        Ok(())
    }
}

/// The whole `config.yml` of a PLBERT training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlbertConfig {
    pub model_params: AlbertConfig,

    /// Training and dataset settings, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl PlbertConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLBERT_YAML: &str = r#"
log_dir: "Checkpoint"
mixed_precision: "fp16"
data_folder: "wikipedia_20220301.en.processed"
batch_size: 192
save_interval: 5000
log_interval: 10
num_process: 1
num_steps: 1000000

dataset_params:
    tokenizer: "transfo-xl-wt103"
    token_separator: " "
    token_mask: "M"
    word_separator: 3039
    token_maps: "token_maps.pkl"
    max_mel_length: 512
    word_mask_prob: 0.15
    phoneme_mask_prob: 0.1
    replace_prob: 0.2

model_params:
    vocab_size: 178
    hidden_size: 768
    num_attention_heads: 12
    intermediate_size: 2048
    max_position_embeddings: 512
    num_hidden_layers: 12
    dropout: 0.1
"#;

    #[test]
    fn test_default_config() {
        let cfg = AlbertConfig::default();
        assert_eq!(cfg.hidden_size, 4096);
        assert_eq!(cfg.embedding_size, 128);
        assert_eq!(cfg.head_dim(), 64);
        assert_eq!(cfg.hidden_act, Activation::NewGelu);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_plbert_config() {
        let cfg = PlbertConfig::from_yaml_str(PLBERT_YAML).unwrap();
        let m = &cfg.model_params;
        assert_eq!(m.vocab_size, 178);
        assert_eq!(m.hidden_size, 768);
        assert_eq!(m.num_attention_heads, 12);
        assert_eq!(m.intermediate_size, 2048);
        assert_eq!(m.num_hidden_layers, 12);
        assert_eq!(m.head_dim(), 64);
        // Not given: falls back to defaults
        assert_eq!(m.embedding_size, 128);
        assert_eq!(m.num_hidden_groups, 1);
        assert_eq!(m.type_vocab_size, 2);
        // Unknown key kept aside
        assert_eq!(m.extra.get("dropout").and_then(|v| v.as_f64()), Some(0.1));
        assert!(cfg.extra.contains_key("dataset_params"));
        assert_eq!(cfg.extra.get("batch_size").and_then(|v| v.as_u64()), Some(192));
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_hidden_act_names() {
        let cfg = PlbertConfig::from_yaml_str("model_params:\n  hidden_act: gelu_new\n").unwrap();
        assert_eq!(cfg.model_params.hidden_act, Activation::NewGelu);
        let cfg = PlbertConfig::from_yaml_str("model_params:\n  hidden_act: relu\n").unwrap();
        assert_eq!(cfg.model_params.hidden_act, Activation::Relu);
    }

    #[test]
    fn test_missing_model_params() {
        let err = PlbertConfig::from_yaml_str("batch_size: 8\n").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = PlbertConfig::from_yaml_str("model_params: [1, 2").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PlbertConfig::from_file("/nonexistent/plbert/config.yml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_validate_rejects_bad_heads() {
        let cfg = AlbertConfig {
            hidden_size: 100,
            num_attention_heads: 12,
            ..AlbertConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_relative_positions() {
        let cfg = AlbertConfig {
            position_embedding_type: "relative_key".to_string(),
            ..AlbertConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
