//! PLBERT text encoder.
//!
//! A thin wrapper over [`AlbertModel`] whose forward pass yields only the
//! final-layer hidden state [B, T, hidden_size]. Pooled output and
//! intermediate states are dropped.

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use super::albert::AlbertModel;
use crate::config::AlbertConfig;

#[derive(Debug, Clone)]
pub struct Plbert {
    albert: AlbertModel,
    hidden_size: usize,
}

impl Plbert {
    pub fn new(cfg: &AlbertConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            albert: AlbertModel::new(cfg, vb)?,
            hidden_size: cfg.hidden_size,
        })
    }

    /// Encode token ids.
    ///
    /// Inputs are passed unchanged to [`AlbertModel::forward`]; returns its
    /// `last_hidden_state`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        token_type_ids: Option<&Tensor>,
    ) -> Result<Tensor> {
        let output = self
            .albert
            .forward(input_ids, attention_mask, token_type_ids)?;
        Ok(output.last_hidden_state)
    }

    /// Output width of [`Plbert::forward`].
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// The underlying ALBERT model.
    pub fn albert(&self) -> &AlbertModel {
        &self.albert
    }
}

impl Module for Plbert {
    fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        Plbert::forward(self, input_ids, None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn tiny_cfg() -> AlbertConfig {
        AlbertConfig {
            vocab_size: 32,
            embedding_size: 8,
            hidden_size: 16,
            num_hidden_layers: 2,
            num_attention_heads: 4,
            intermediate_size: 24,
            max_position_embeddings: 16,
            output_hidden_states: true,
            ..AlbertConfig::default()
        }
    }

    #[test]
    fn test_forward_is_last_hidden_state() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let plbert = Plbert::new(&tiny_cfg(), vb).unwrap();

        let ids = Tensor::new(&[[3u32, 1, 4, 1, 5], [9, 2, 6, 0, 0]], &dev).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 1, 1, 1], [1, 1, 1, 0, 0]], &dev).unwrap();

        let out = plbert.forward(&ids, Some(&mask), None).unwrap();
        let base = plbert.albert().forward(&ids, Some(&mask), None).unwrap();

        assert_eq!(out.dims(), &[2, 5, 16]);
        assert_eq!(out.dims(), base.last_hidden_state.dims());
        let a: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = base.last_hidden_state.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_module_forward() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let plbert = Plbert::new(&tiny_cfg(), vb).unwrap();
        let ids = Tensor::new(&[[1u32, 2, 3]], &dev).unwrap();
        let out = ids.apply(&plbert).unwrap();
        assert_eq!(out.dims(), &[1, 3, plbert.hidden_size()]);
    }
}
