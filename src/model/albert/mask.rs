//! Attention mask expansion.
//!
//! Turns a `[B, T]` padding mask (1 = attend, 0 = padding) into an additive
//! `[B, 1, 1, T]` bias with 0.0 for visible keys and the dtype minimum for
//! padded keys.

use candle_core::{DType, Result, Tensor};

/// Most negative finite value for `dtype`.
pub fn dtype_min(dtype: DType) -> f64 {
    match dtype {
        DType::F32 => f64::from(f32::MIN),
        DType::F16 => f64::from(half::f16::MIN),
        DType::BF16 => f64::from(half::bf16::MIN),
        DType::F64 => f64::MIN,
        _ => f64::from(f32::MIN),
    }
}

/// Expand a `[B, T]` padding mask into an additive `[B, 1, 1, T]` bias.
pub fn extended_attention_mask(attention_mask: &Tensor, dtype: DType) -> Result<Tensor> {
    let (batch, seq_len) = attention_mask.dims2()?;
    // (1 - mask) * min
    let inverted = attention_mask.to_dtype(DType::F32)?.affine(-1.0, 1.0)?;
    (inverted * dtype_min(dtype))?
        .to_dtype(dtype)?
        .reshape((batch, 1, 1, seq_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_extended_mask_values() {
        let mask = Tensor::new(&[[1u32, 1, 0], [1, 0, 0]], &Device::Cpu).unwrap();
        let ext = extended_attention_mask(&mask, DType::F32).unwrap();
        assert_eq!(ext.dims(), &[2, 1, 1, 3]);
        let vals: Vec<f32> = ext.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(vals[0], 0.0);
        assert_eq!(vals[1], 0.0);
        assert_eq!(vals[2], f32::MIN);
        assert_eq!(vals[3], 0.0);
        assert_eq!(vals[4], f32::MIN);
    }

    #[test]
    fn test_all_visible_mask_is_zero() {
        let mask = Tensor::ones((1, 4), DType::F32, &Device::Cpu).unwrap();
        let ext = extended_attention_mask(&mask, DType::F32).unwrap();
        let sum: f32 = ext.abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert!(sum < 1e-6);
    }
}
