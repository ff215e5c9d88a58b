//! ALBERT input embeddings.
//!
//! ```text
//! word_embeddings(input_ids) + position_embeddings(0..T) + token_type_embeddings(type_ids)
//!   → LayerNorm(embedding_size)
//! ```
//!
//! Output width is `embedding_size`, not `hidden_size`; the encoder projects
//! it up with `embedding_hidden_mapping_in`.

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{Embedding, LayerNorm, VarBuilder};

use super::{embedding, layer_norm};
use crate::config::AlbertConfig;

#[derive(Debug, Clone)]
pub struct AlbertEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
}

impl AlbertEmbeddings {
    pub fn new(cfg: &AlbertConfig, vb: VarBuilder) -> Result<Self> {
        let std = cfg.initializer_range;
        Ok(Self {
            word_embeddings: embedding(
                cfg.vocab_size,
                cfg.embedding_size,
                std,
                vb.pp("word_embeddings"),
            )?,
            position_embeddings: embedding(
                cfg.max_position_embeddings,
                cfg.embedding_size,
                std,
                vb.pp("position_embeddings"),
            )?,
            token_type_embeddings: embedding(
                cfg.type_vocab_size,
                cfg.embedding_size,
                std,
                vb.pp("token_type_embeddings"),
            )?,
            layer_norm: layer_norm(cfg.embedding_size, cfg.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    /// Token embedding table, [vocab_size, embedding_size].
    pub fn word_embeddings(&self) -> &Embedding {
        &self.word_embeddings
    }

    /// - `input_ids`: [B, T] (u32)
    /// - `token_type_ids`: [B, T], zeros when `None`
    ///
    /// Returns [B, T, embedding_size].
    pub fn forward(&self, input_ids: &Tensor, token_type_ids: Option<&Tensor>) -> Result<Tensor> {
        let (_batch, seq_len) = input_ids.dims2()?;
        let device = input_ids.device();

        let position_ids = Tensor::arange(0u32, seq_len as u32, device)?.unsqueeze(0)?;
        let token_type_ids = match token_type_ids {
            Some(ids) => ids.to_dtype(DType::U32)?,
            None => input_ids.zeros_like()?.to_dtype(DType::U32)?,
        };

        let words = self.word_embeddings.forward(input_ids)?;
        let positions = self.position_embeddings.forward(&position_ids)?;
        let token_types = self.token_type_embeddings.forward(&token_type_ids)?;

        let h = words.broadcast_add(&positions)?.add(&token_types)?;
        self.layer_norm.forward(&h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_embeddings_shape() {
        let dev = Device::Cpu;
        let cfg = AlbertConfig {
            vocab_size: 20,
            embedding_size: 8,
            max_position_embeddings: 16,
            ..AlbertConfig::default()
        };
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let emb = AlbertEmbeddings::new(&cfg, vb.pp("embeddings")).unwrap();
        let ids = Tensor::new(&[[1u32, 2, 3, 4, 5], [6, 7, 8, 0, 0]], &dev).unwrap();
        let out = emb.forward(&ids, None).unwrap();
        assert_eq!(out.dims(), &[2, 5, 8]);
    }
}
