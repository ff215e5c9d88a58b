//! ALBERT transformer layer types.
//!
//! - [`AlbertAttention`] — multi-head self-attention with post-norm residual
//! - [`AlbertLayer`] — attention + feed-forward, post-norm
//! - [`AlbertLayerGroup`] — `inner_group_num` layers whose weights are reused
//!   by every pass assigned to the group

use candle_core::{Module, Result, Tensor};
use candle_nn::{Activation, LayerNorm, Linear, VarBuilder};

use super::{layer_norm, linear};
use crate::config::AlbertConfig;

// ---------------------------------------------------------------------------
// Attention
// ---------------------------------------------------------------------------

/// Scaled dot-product self-attention followed by `LayerNorm(x + dense(ctx))`.
#[derive(Debug, Clone)]
pub struct AlbertAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    dense: Linear,
    layer_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl AlbertAttention {
    pub fn new(cfg: &AlbertConfig, vb: VarBuilder) -> Result<Self> {
        if cfg.num_attention_heads == 0 || cfg.hidden_size % cfg.num_attention_heads != 0 {
            candle_core::bail!(
                "hidden_size ({}) is not a multiple of num_attention_heads ({})",
                cfg.hidden_size,
                cfg.num_attention_heads
            );
        }
        let h = cfg.hidden_size;
        let std = cfg.initializer_range;
        Ok(Self {
            query: linear(h, h, std, vb.pp("query"))?,
            key: linear(h, h, std, vb.pp("key"))?,
            value: linear(h, h, std, vb.pp("value"))?,
            dense: linear(h, h, std, vb.pp("dense"))?,
            layer_norm: layer_norm(h, cfg.layer_norm_eps, vb.pp("LayerNorm"))?,
            num_heads: cfg.num_attention_heads,
            head_dim: cfg.head_dim(),
        })
    }

    /// - `hidden_states`: [B, T, H]
    /// - `attention_mask`: additive [B, 1, 1, T]
    pub fn forward(&self, hidden_states: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let (batch, seq_len, hidden) = hidden_states.dims3()?;

        // [B, T, H] → [B, heads, T, head_dim]
        let split_heads = |x: Tensor| -> Result<Tensor> {
            x.reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split_heads(self.query.forward(hidden_states)?)?;
        let k = split_heads(self.key.forward(hidden_states)?)?;
        let v = split_heads(self.value.forward(hidden_states)?)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? / scale)?;
        let scores = match attention_mask {
            Some(mask) => scores.broadcast_add(mask)?,
            None => scores,
        };
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;

        // [B, heads, T, head_dim] → [B, T, H]
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, hidden))?;

        let projected = self.dense.forward(&context)?;
        self.layer_norm.forward(&(hidden_states + projected)?)
    }
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// One ALBERT layer: attention, then `full_layer_layer_norm(ffn_output + attn)`.
#[derive(Debug, Clone)]
pub struct AlbertLayer {
    attention: AlbertAttention,
    ffn: Linear,
    ffn_output: Linear,
    activation: Activation,
    full_layer_layer_norm: LayerNorm,
}

impl AlbertLayer {
    pub fn new(cfg: &AlbertConfig, vb: VarBuilder) -> Result<Self> {
        let std = cfg.initializer_range;
        Ok(Self {
            attention: AlbertAttention::new(cfg, vb.pp("attention"))?,
            ffn: linear(cfg.hidden_size, cfg.intermediate_size, std, vb.pp("ffn"))?,
            ffn_output: linear(cfg.intermediate_size, cfg.hidden_size, std, vb.pp("ffn_output"))?,
            activation: cfg.hidden_act,
            full_layer_layer_norm: layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("full_layer_layer_norm"),
            )?,
        })
    }

    pub fn forward(&self, hidden_states: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let attention_output = self.attention.forward(hidden_states, attention_mask)?;
        let ffn = self
            .ffn
            .forward(&attention_output)?
            .apply(&self.activation)?;
        let ffn = self.ffn_output.forward(&ffn)?;
        self.full_layer_layer_norm.forward(&(ffn + attention_output)?)
    }
}

// ---------------------------------------------------------------------------
// Layer group
// ---------------------------------------------------------------------------

/// `albert_layer_groups.{g}`: a stack of `inner_group_num` layers.
#[derive(Debug, Clone)]
pub struct AlbertLayerGroup {
    albert_layers: Vec<AlbertLayer>,
}

impl AlbertLayerGroup {
    pub fn new(cfg: &AlbertConfig, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("albert_layers");
        let albert_layers = (0..cfg.inner_group_num)
            .map(|i| AlbertLayer::new(cfg, vb.pp(i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { albert_layers })
    }

    pub fn forward(&self, hidden_states: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let mut h = hidden_states.clone();
        for layer in &self.albert_layers {
            h = layer.forward(&h, attention_mask)?;
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_cfg() -> AlbertConfig {
        AlbertConfig {
            hidden_size: 16,
            num_attention_heads: 2,
            intermediate_size: 32,
            ..AlbertConfig::default()
        }
    }

    #[test]
    fn test_layer_shape() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let layer = AlbertLayer::new(&small_cfg(), vb.pp("layer")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 7, 16), &dev).unwrap();
        let y = layer.forward(&x, None).unwrap();
        assert_eq!(y.dims(), &[2, 7, 16]);
    }

    #[test]
    fn test_bad_head_count_fails() {
        let cfg = AlbertConfig {
            hidden_size: 10,
            num_attention_heads: 3,
            ..small_cfg()
        };
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(AlbertAttention::new(&cfg, vb).is_err());
    }

    #[test]
    fn test_padded_keys_do_not_affect_visible_positions() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let attn = AlbertAttention::new(&small_cfg(), vb.pp("attention")).unwrap();

        let x = Tensor::randn(0f32, 1.0, (1, 4, 16), &dev).unwrap();
        // Replace the padded position with different content
        let x_alt = Tensor::cat(
            &[
                &x.narrow(1, 0, 3).unwrap(),
                &Tensor::randn(0f32, 1.0, (1, 1, 16), &dev).unwrap(),
            ],
            1,
        )
        .unwrap();

        let mask = Tensor::new(&[[1u32, 1, 1, 0]], &dev).unwrap();
        let mask = super::super::mask::extended_attention_mask(&mask, DType::F32).unwrap();

        let a = attn.forward(&x, Some(&mask)).unwrap().narrow(1, 0, 3).unwrap();
        let b = attn.forward(&x_alt, Some(&mask)).unwrap().narrow(1, 0, 3).unwrap();
        let diff: f32 = (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5, "diff = {diff}");
    }
}
