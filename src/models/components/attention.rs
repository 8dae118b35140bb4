//! Grouped-query self-attention, its KV cache and the gated MLP that follows it.

use super::layers::Linear;
use super::rope::{RoPE, RoPEParams};
use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::VarBuilder;
use std::sync::Arc;

/// Repeats a key or value tensor for grouped query attention
/// The input tensor should have a shape `(batch, num_kv_heads, seq_len, head_dim)`,
pub fn repeat_kv(xs: Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        Ok(xs)
    } else {
        let (b_sz, n_kv_head, seq_len, head_dim) = xs.dims4()?;
        // cat avoids the strided copy an expand+reshape would need.
        Tensor::cat(&vec![&xs; n_rep], 2)?.reshape((b_sz, n_kv_head * n_rep, seq_len, head_dim))
    }
}

/// Additive mask of shape `(batch, 1, seq_len, position_offset + seq_len)`.
///
/// Query row `i` sits at absolute position `position_offset + i` and may attend
/// to every key at or before it.
pub fn causal_mask(
    batch_size: usize,
    seq_len: usize,
    position_offset: usize,
    device: &Device,
) -> Result<Tensor> {
    let total_len = seq_len + position_offset;
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| {
            (0..total_len).map(move |j| {
                if j > i + position_offset {
                    f32::NEG_INFINITY
                } else {
                    0.
                }
            })
        })
        .collect();
    Tensor::from_slice(&mask, (seq_len, total_len), device)?
        .broadcast_as((batch_size, 1, seq_len, total_len))
}

/// Keys and values of every position already processed by one layer.
#[derive(Debug, Clone, Default)]
pub struct KvCache {
    k: Option<Tensor>,
    v: Option<Tensor>,
}

impl KvCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `(batch, kv_heads, seq, head_dim)` keys and values, returning the
    /// full cached sequences.
    pub fn update(&mut self, k: Tensor, v: Tensor) -> Result<(Tensor, Tensor)> {
        let (k, v) = match (&self.k, &self.v) {
            (Some(cached_k), Some(cached_v)) => (
                Tensor::cat(&[cached_k, &k], 2)?.contiguous()?,
                Tensor::cat(&[cached_v, &v], 2)?.contiguous()?,
            ),
            _ => (k, v),
        };
        self.k = Some(k.clone());
        self.v = Some(v.clone());
        Ok((k, v))
    }

    pub fn reset(&mut self) {
        self.k = None;
        self.v = None;
    }

    pub fn current_seq_len(&self) -> usize {
        self.k
            .as_ref()
            .and_then(|k| k.dim(2).ok())
            .unwrap_or(0)
    }
}

/// Configuration for attention layer
#[derive(Debug, Clone, Copy)]
pub struct AttentionConfig {
    pub hidden_size: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
}

#[derive(Debug, Clone)]
pub struct Attention<P: RoPEParams> {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    rope: Arc<RoPE<P>>,
}

impl<P: RoPEParams> Attention<P> {
    /// Load `{q,k,v,o}_proj` from a `self_attn` prefix.
    pub fn load(config: AttentionConfig, rope: Arc<RoPE<P>>, vb: VarBuilder) -> Result<Self> {
        let AttentionConfig {
            hidden_size,
            num_heads,
            num_kv_heads,
            head_dim,
        } = config;

        Ok(Self {
            q_proj: Linear::new(hidden_size, num_heads * head_dim, vb.pp("q_proj"))?,
            k_proj: Linear::new(hidden_size, num_kv_heads * head_dim, vb.pp("k_proj"))?,
            v_proj: Linear::new(hidden_size, num_kv_heads * head_dim, vb.pp("v_proj"))?,
            o_proj: Linear::new(num_heads * head_dim, hidden_size, vb.pp("o_proj"))?,
            num_heads,
            num_kv_heads,
            head_dim,
            rope,
        })
    }

    pub fn forward(
        &self,
        hidden_states: &Tensor,
        attention_mask: Option<&Tensor>,
        position_offset: usize,
        kv_cache: &mut KvCache,
    ) -> Result<Tensor> {
        let (batch_size, seq_len, _hidden_size) = hidden_states.dims3()?;
        let dtype = hidden_states.dtype();

        let q = self
            .q_proj
            .forward(hidden_states)?
            .reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(hidden_states)?
            .reshape((batch_size, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(hidden_states)?
            .reshape((batch_size, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (q, k) = self.rope.apply(&q, &k, position_offset)?;
        let (k, v) = kv_cache.update(k, v)?;

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, n_rep)?;
        let v = repeat_kv(v, n_rep)?;

        // Scores and softmax in f32; half precision overflows on long prompts.
        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)?.to_dtype(DType::F32)? / scale)?;
        let scores = match attention_mask {
            Some(mask) => scores.broadcast_add(mask)?,
            None => scores,
        };
        let attn_weights = candle_nn::ops::softmax_last_dim(&scores)?.to_dtype(dtype)?;
        let attn_output = attn_weights.matmul(&v.contiguous()?)?;

        let attn_output = attn_output
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.num_heads * self.head_dim))?;

        self.o_proj.forward(&attn_output)
    }
}

/// SwiGLU feed-forward block.
#[derive(Debug, Clone)]
pub struct FeedForward {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl FeedForward {
    pub fn load(hidden_size: usize, intermediate_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gate_proj: Linear::new(hidden_size, intermediate_size, vb.pp("gate_proj"))?,
            up_proj: Linear::new(hidden_size, intermediate_size, vb.pp("up_proj"))?,
            down_proj: Linear::new(intermediate_size, hidden_size, vb.pp("down_proj"))?,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = self.gate_proj.forward(x)?.silu()?;
        let up = self.up_proj.forward(x)?;
        self.down_proj.forward(&(gate * up)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_causal_mask_with_offset() -> Result<()> {
        let mask = causal_mask(1, 2, 1, &Device::Cpu)?;
        assert_eq!(mask.dims(), &[1, 1, 2, 3]);

        let rows = mask.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()?;
        assert_eq!(rows[0], vec![0., 0., f32::NEG_INFINITY]);
        assert_eq!(rows[1], vec![0., 0., 0.]);
        Ok(())
    }

    #[test]
    fn test_kv_cache_appends_along_sequence() -> Result<()> {
        let device = Device::Cpu;
        let mut cache = KvCache::new();
        assert_eq!(cache.current_seq_len(), 0);

        let step = Tensor::zeros((1, 2, 3, 4), DType::F32, &device)?;
        cache.update(step.clone(), step.clone())?;
        let (k, v) = cache.update(step.narrow(2, 0, 1)?, step.narrow(2, 0, 1)?)?;
        assert_eq!(k.dims(), &[1, 2, 4, 4]);
        assert_eq!(v.dims(), &[1, 2, 4, 4]);
        assert_eq!(cache.current_seq_len(), 4);

        cache.reset();
        assert_eq!(cache.current_seq_len(), 0);
        Ok(())
    }

    #[test]
    fn test_repeat_kv_duplicates_heads() -> Result<()> {
        let xs = Tensor::arange(0f32, 4., &Device::Cpu)?.reshape((1, 2, 1, 2))?;
        let repeated = repeat_kv(xs, 2)?;
        assert_eq!(repeated.dims(), &[1, 4, 1, 2]);
        assert_eq!(
            repeated.flatten_all()?.to_vec1::<f32>()?,
            vec![0., 1., 0., 1., 2., 3., 2., 3.]
        );
        Ok(())
    }
}
