//! Rotary position embeddings with per-model frequency customization.

use candle_core::{DType, Device, Result, Tensor, D};
use serde::Deserialize;

/// Parameters for RoPE (Rotary Position Embedding) configuration
pub trait RoPEParams: Clone + Send + Sync {
    /// Base frequency for RoPE calculations
    fn theta(&self) -> f64;

    /// Adjust the inverse frequencies after they are derived from `theta`.
    fn scale_frequencies(&self, inv_freq: Vec<f64>) -> Vec<f64> {
        inv_freq
    }
}

/// `rope_scaling` block of a Llama 3.x `config.json`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RopeScaling {
    pub factor: f64,
    #[serde(default = "default_low_freq_factor")]
    pub low_freq_factor: f64,
    #[serde(default = "default_high_freq_factor")]
    pub high_freq_factor: f64,
    #[serde(default = "default_original_max_position_embeddings")]
    pub original_max_position_embeddings: usize,
    #[serde(alias = "type")]
    pub rope_type: String,
}

fn default_low_freq_factor() -> f64 {
    1.0
}

fn default_high_freq_factor() -> f64 {
    4.0
}

fn default_original_max_position_embeddings() -> usize {
    8192
}

#[derive(Debug, Clone)]
pub struct LlamaRoPEParams {
    pub theta: f64,
    pub scaling: Option<RopeScaling>,
}

impl RoPEParams for LlamaRoPEParams {
    fn theta(&self) -> f64 {
        self.theta
    }

    /// Llama 3 wavelength-dependent scaling: long wavelengths are divided by
    /// `factor`, short ones kept, and the band in between interpolated.
    fn scale_frequencies(&self, inv_freq: Vec<f64>) -> Vec<f64> {
        let Some(scaling) = self.scaling.as_ref().filter(|s| s.rope_type == "llama3") else {
            return inv_freq;
        };

        let old_context_len = scaling.original_max_position_embeddings as f64;
        let low_freq_wavelen = old_context_len / scaling.low_freq_factor;
        let high_freq_wavelen = old_context_len / scaling.high_freq_factor;

        inv_freq
            .into_iter()
            .map(|freq| {
                let wavelen = 2. * std::f64::consts::PI / freq;
                if wavelen < high_freq_wavelen {
                    freq
                } else if wavelen > low_freq_wavelen {
                    freq / scaling.factor
                } else {
                    let smooth = (old_context_len / wavelen - scaling.low_freq_factor)
                        / (scaling.high_freq_factor - scaling.low_freq_factor);
                    (1. - smooth) * freq / scaling.factor + smooth * freq
                }
            })
            .collect()
    }
}

/// Precomputed cos/sin tables for positions `0..max_seq_len`.
#[derive(Debug, Clone)]
pub struct RoPE<P: RoPEParams> {
    cos: Tensor,
    sin: Tensor,
    params: P,
}

impl<P: RoPEParams> RoPE<P> {
    pub fn new(
        dtype: DType,
        head_dim: usize,
        max_seq_len: usize,
        params: P,
        device: &Device,
    ) -> Result<Self> {
        let inv_freq = params.scale_frequencies(inverse_frequencies(params.theta(), head_dim));

        let mut freqs = Vec::with_capacity(max_seq_len * head_dim / 2);
        for position in 0..max_seq_len {
            for &freq in &inv_freq {
                freqs.push((position as f64 * freq) as f32);
            }
        }

        let freqs = Tensor::from_vec(freqs, (max_seq_len, head_dim / 2), device)?;
        let cos = freqs.cos()?.to_dtype(dtype)?;
        let sin = freqs.sin()?.to_dtype(dtype)?;

        Ok(Self { cos, sin, params })
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    /// Rotate `(batch, heads, seq, head_dim)` query and key tensors whose first
    /// position is `position_offset`, using the split-half convention.
    pub fn apply(&self, q: &Tensor, k: &Tensor, position_offset: usize) -> Result<(Tensor, Tensor)> {
        let (_batch_size, _num_heads, seq_len, _head_dim) = q.dims4()?;

        let cos = self.cos.narrow(0, position_offset, seq_len)?;
        let sin = self.sin.narrow(0, position_offset, seq_len)?;

        Ok((rotate(q, &cos, &sin)?, rotate(k, &cos, &sin)?))
    }
}

fn rotate(xs: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
    let half_dim = xs.dim(D::Minus1)? / 2;
    let x1 = xs.narrow(D::Minus1, 0, half_dim)?;
    let x2 = xs.narrow(D::Minus1, half_dim, half_dim)?;
    Tensor::cat(
        &[
            (x1.broadcast_mul(cos)? - x2.broadcast_mul(sin)?)?,
            (x1.broadcast_mul(sin)? + x2.broadcast_mul(cos)?)?,
        ],
        D::Minus1,
    )
}

fn inverse_frequencies(theta: f64, head_dim: usize) -> Vec<f64> {
    (0..head_dim)
        .step_by(2)
        .map(|i| 1.0 / theta.powf(i as f64 / head_dim as f64))
        .collect()
}
