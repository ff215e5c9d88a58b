//! ALBERT encoder.
//!
//! Cross-layer parameter sharing: `num_hidden_layers` passes run over only
//! `num_hidden_groups` distinct layer groups, and the factorized embedding
//! is projected from `embedding_size` up to `hidden_size` before the first
//! pass.
//!
//! ```text
//! embeddings (word + position + token type → LayerNorm)     [B, T, E]
//!   → encoder.embedding_hidden_mapping_in                   [B, T, H]
//!   → num_hidden_layers × albert_layer_groups[i / (L / G)]  [B, T, H]
//!   → last_hidden_state
//!   → pooler: tanh(Linear(h[:, 0]))                         [B, H]
//! ```
//!
//! ## Weight key paths
//!
//! ```text
//! embeddings.word_embeddings.weight
//! embeddings.position_embeddings.weight
//! embeddings.token_type_embeddings.weight
//! embeddings.LayerNorm.{weight,bias}
//! encoder.embedding_hidden_mapping_in.{weight,bias}
//! encoder.albert_layer_groups.{g}.albert_layers.{i}.attention.{query,key,value,dense}.{weight,bias}
//! encoder.albert_layer_groups.{g}.albert_layers.{i}.attention.LayerNorm.{weight,bias}
//! encoder.albert_layer_groups.{g}.albert_layers.{i}.ffn.{weight,bias}
//! encoder.albert_layer_groups.{g}.albert_layers.{i}.ffn_output.{weight,bias}
//! encoder.albert_layer_groups.{g}.albert_layers.{i}.full_layer_layer_norm.{weight,bias}
//! pooler.{weight,bias}
//! ```

pub mod embeddings;
pub mod layer;
pub mod mask;

use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{Embedding, Init, LayerNorm, Linear, VarBuilder, VarMap};

use crate::config::AlbertConfig;
use embeddings::AlbertEmbeddings;
use layer::AlbertLayerGroup;

// ---------------------------------------------------------------------------
// Parameter constructors
// ---------------------------------------------------------------------------

/// Parameter name of the word embedding table.
pub const WORD_EMBEDDINGS_WEIGHT: &str = "embeddings.word_embeddings.weight";

/// Linear layer with weight ~ N(0, std) and zero bias.
pub(crate) fn linear(in_dim: usize, out_dim: usize, std: f64, vb: VarBuilder) -> Result<Linear> {
    let init = Init::Randn { mean: 0.0, stdev: std };
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", init)?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Embedding table with weight ~ N(0, std).
pub(crate) fn embedding(num: usize, dim: usize, std: f64, vb: VarBuilder) -> Result<Embedding> {
    let init = Init::Randn { mean: 0.0, stdev: std };
    let weight = vb.get_with_hints((num, dim), "weight", init)?;
    Ok(Embedding::new(weight, dim))
}

/// Zero the `pad_token_id` row of the word embedding table held in `varmap`.
///
/// `get_with_hints` can only fill a whole tensor, so this runs once after
/// [`AlbertModel::new`]. A missing table or an out-of-range id is a no-op.
pub fn zero_padding_embedding(varmap: &VarMap, pad_token_id: u32) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(e.to_string()))?;
    let Some(var) = vars.get(WORD_EMBEDDINGS_WEIGHT) else {
        return Ok(());
    };
    let (vocab_size, _) = var.dims2()?;
    let pad = pad_token_id as usize;
    if pad >= vocab_size {
        return Ok(());
    }
    let mut keep = vec![1f32; vocab_size];
    keep[pad] = 0.0;
    let keep = Tensor::from_vec(keep, (vocab_size, 1), var.device())?.to_dtype(var.dtype())?;
    var.set(&var.as_tensor().broadcast_mul(&keep)?)
}

/// LayerNorm with unit weight and zero bias.
pub(crate) fn layer_norm(dim: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
    let bias = vb.get_with_hints(dim, "bias", Init::Const(0.0))?;
    Ok(LayerNorm::new(weight, bias, eps))
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// `encoder.*`: embedding projection plus the shared layer groups.
#[derive(Debug, Clone)]
pub struct AlbertTransformer {
    embedding_hidden_mapping_in: Linear,
    albert_layer_groups: Vec<AlbertLayerGroup>,
    num_hidden_layers: usize,
    layers_per_group: f64,
}

impl AlbertTransformer {
    pub fn new(cfg: &AlbertConfig, vb: VarBuilder) -> Result<Self> {
        if cfg.num_hidden_groups == 0 {
            candle_core::bail!("num_hidden_groups must be at least 1");
        }
        let embedding_hidden_mapping_in = linear(
            cfg.embedding_size,
            cfg.hidden_size,
            cfg.initializer_range,
            vb.pp("embedding_hidden_mapping_in"),
        )?;
        let groups_vb = vb.pp("albert_layer_groups");
        let albert_layer_groups = (0..cfg.num_hidden_groups)
            .map(|g| AlbertLayerGroup::new(cfg, groups_vb.pp(g)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            embedding_hidden_mapping_in,
            albert_layer_groups,
            num_hidden_layers: cfg.num_hidden_layers,
            layers_per_group: cfg.layers_per_group(),
        })
    }

    /// Layer group run by pass `layer_idx`.
    pub fn group_index(&self, layer_idx: usize) -> usize {
        let g = (layer_idx as f64 / self.layers_per_group) as usize;
        g.min(self.albert_layer_groups.len() - 1)
    }

    /// Returns the final hidden state and, when `collect` is set, the
    /// projected embedding followed by the output of every pass.
    pub fn forward(
        &self,
        embeddings: &Tensor,
        attention_mask: Option<&Tensor>,
        collect: bool,
    ) -> Result<(Tensor, Option<Vec<Tensor>>)> {
        let mut h = self.embedding_hidden_mapping_in.forward(embeddings)?;
        let mut all = collect.then(|| vec![h.clone()]);

        for i in 0..self.num_hidden_layers {
            let group = &self.albert_layer_groups[self.group_index(i)];
            h = group.forward(&h, attention_mask)?;
            if let Some(all) = all.as_mut() {
                all.push(h.clone());
            }
        }
        Ok((h, all))
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Everything the base model computes for one forward pass.
#[derive(Debug, Clone)]
pub struct AlbertOutput {
    /// [B, T, hidden_size]
    pub last_hidden_state: Tensor,
    /// [B, hidden_size]
    pub pooler_output: Tensor,
    /// `num_hidden_layers + 1` tensors of [B, T, hidden_size], only when
    /// `output_hidden_states` is set in the config.
    pub hidden_states: Option<Vec<Tensor>>,
}

/// ALBERT base model with pooling head.
#[derive(Debug, Clone)]
pub struct AlbertModel {
    embeddings: AlbertEmbeddings,
    encoder: AlbertTransformer,
    pooler: Linear,
    output_hidden_states: bool,
}

impl AlbertModel {
    /// Build the model. Parameters are fetched from `vb` under the paths in
    /// the module docs; with a `VarMap` backend they are freshly initialized.
    pub fn new(cfg: &AlbertConfig, vb: VarBuilder) -> Result<Self> {
        if cfg.position_embedding_type != "absolute" {
            candle_core::bail!(
                "unsupported position_embedding_type '{}'",
                cfg.position_embedding_type
            );
        }
        Ok(Self {
            embeddings: AlbertEmbeddings::new(cfg, vb.pp("embeddings"))?,
            encoder: AlbertTransformer::new(cfg, vb.pp("encoder"))?,
            pooler: linear(
                cfg.hidden_size,
                cfg.hidden_size,
                cfg.initializer_range,
                vb.pp("pooler"),
            )?,
            output_hidden_states: cfg.output_hidden_states,
        })
    }

    /// Forward pass.
    ///
    /// - `input_ids`: [B, T] token ids
    /// - `attention_mask`: [B, T], 1 = attend, 0 = padding; all ones when `None`
    /// - `token_type_ids`: [B, T]; all zeros when `None`
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        token_type_ids: Option<&Tensor>,
    ) -> Result<AlbertOutput> {
        let embeddings = self.embeddings.forward(input_ids, token_type_ids)?;
        let mask = attention_mask
            .map(|m| mask::extended_attention_mask(m, embeddings.dtype()))
            .transpose()?;

        let (last_hidden_state, hidden_states) =
            self.encoder
                .forward(&embeddings, mask.as_ref(), self.output_hidden_states)?;

        let first_token = last_hidden_state.i((.., 0))?;
        let pooler_output = self.pooler.forward(&first_token)?.tanh()?;

        Ok(AlbertOutput {
            last_hidden_state,
            pooler_output,
            hidden_states,
        })
    }
}
