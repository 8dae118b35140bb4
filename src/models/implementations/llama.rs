//! Llama-family causal language model loaded from safetensors.
//!
//! Covers the Llama 3.x checkpoints on the Hugging Face Hub:
//! - grouped-query attention with a KV cache per layer
//! - llama3 rope frequency scaling
//! - tied or separate output heads
//! - weights materialized in the requested precision

use crate::core::{GenerationConfig, Precision};
use crate::loaders::{ConfigLoader, GenerationConfigLoader, SafetensorsLoader};
use crate::models::components::{
    causal_mask, Attention, AttentionConfig, Embedding, FeedForward, KvCache, Linear,
    LlamaRoPEParams, RmsNorm, RoPE, RopeScaling,
};
use crate::models::generation::GenerationParams;
use crate::pipelines::text_generation::model::{LanguageModelContext, TextGenerationModel};
use async_trait::async_trait;
use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::VarBuilder;
use serde::Deserialize;
use std::sync::Arc;

/// Upper bound on positions precomputed for rope, regardless of what the
/// checkpoint advertises (Llama 3.2 claims 131072).
pub const DEFAULT_MAX_SEQ_LEN: usize = 4096;

pub const LLAMA_ARCHITECTURES: &[&str] = &["LlamaForCausalLM"];

/// `config.json` of a Llama checkpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LlamaConfig {
    #[serde(default)]
    pub architectures: Vec<String>,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub num_key_value_heads: Option<usize>,
    pub head_dim: Option<usize>,
    pub rms_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    pub vocab_size: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    pub rope_scaling: Option<RopeScaling>,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    pub eos_token_id: Option<serde_json::Value>,
}

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_max_position_embeddings() -> usize {
    DEFAULT_MAX_SEQ_LEN
}

impl LlamaConfig {
    pub fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
            .unwrap_or(self.hidden_size / self.num_attention_heads)
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_position_embeddings.min(DEFAULT_MAX_SEQ_LEN)
    }

    pub fn eos_token_ids(&self) -> Vec<u32> {
        crate::loaders::token_ids(self.eos_token_id.clone()).unwrap_or_default()
    }

}

/// Whether a `config.json` describes a checkpoint this module can load.
pub fn is_llama(architectures: &[String], model_type: Option<&str>) -> bool {
    architectures
        .iter()
        .any(|a| LLAMA_ARCHITECTURES.contains(&a.as_str()))
        || (architectures.is_empty() && model_type == Some("llama"))
}

type LlamaAttention = Attention<LlamaRoPEParams>;

/// Pre-norm decoder block.
#[derive(Debug)]
struct DecoderLayer {
    attention: LlamaAttention,
    feed_forward: FeedForward,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn load(config: &LlamaConfig, rope: Arc<RoPE<LlamaRoPEParams>>, vb: VarBuilder) -> Result<Self> {
        let attention = LlamaAttention::load(
            AttentionConfig {
                hidden_size: config.hidden_size,
                num_heads: config.num_attention_heads,
                num_kv_heads: config.num_kv_heads(),
                head_dim: config.head_dim(),
            },
            rope,
            vb.pp("self_attn"),
        )?;
        let feed_forward =
            FeedForward::load(config.hidden_size, config.intermediate_size, vb.pp("mlp"))?;
        let input_layernorm =
            RmsNorm::new(config.hidden_size, config.rms_norm_eps, vb.pp("input_layernorm"))?;
        let post_attention_layernorm = RmsNorm::new(
            config.hidden_size,
            config.rms_norm_eps,
            vb.pp("post_attention_layernorm"),
        )?;

        Ok(Self {
            attention,
            feed_forward,
            input_layernorm,
            post_attention_layernorm,
        })
    }

    fn forward(
        &self,
        hidden_states: &Tensor,
        attention_mask: Option<&Tensor>,
        position_offset: usize,
        kv_cache: &mut KvCache,
    ) -> Result<Tensor> {
        let normed = self.input_layernorm.forward(hidden_states)?;
        let attention_out =
            self.attention
                .forward(&normed, attention_mask, position_offset, kv_cache)?;
        let hidden_states = (hidden_states + attention_out)?;

        let normed = self.post_attention_layernorm.forward(&hidden_states)?;
        let ffn_out = self.feed_forward.forward(&normed)?;
        hidden_states + ffn_out
    }
}

/// All weights of the network, shared read-only between contexts.
pub struct ModelWeights {
    embeddings: Embedding,
    layers: Vec<DecoderLayer>,
    final_norm: RmsNorm,
    lm_head: Linear,
    device: Device,
    dtype: DType,
    max_seq_len: usize,
}

impl ModelWeights {
    /// Build the network from a root-level [`VarBuilder`] using Hugging Face
    /// tensor names (`model.layers.{i}.self_attn.q_proj.weight`, ...).
    pub fn load(config: &LlamaConfig, vb: VarBuilder) -> Result<Self> {
        let device = vb.device().clone();
        let dtype = vb.dtype();
        let max_seq_len = config.max_seq_len();

        let rope = Arc::new(RoPE::new(
            dtype,
            config.head_dim(),
            max_seq_len,
            LlamaRoPEParams {
                theta: config.rope_theta,
                scaling: config.rope_scaling.clone(),
            },
            &device,
        )?);

        let vb_model = vb.pp("model");
        let embeddings = Embedding::new(
            config.vocab_size,
            config.hidden_size,
            vb_model.pp("embed_tokens"),
        )?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for layer_idx in 0..config.num_hidden_layers {
            layers.push(DecoderLayer::load(
                config,
                rope.clone(),
                vb_model.pp(format!("layers.{layer_idx}")),
            )?);
        }

        let final_norm = RmsNorm::new(config.hidden_size, config.rms_norm_eps, vb_model.pp("norm"))?;
        let lm_head = if config.tie_word_embeddings {
            Linear::from_weights(embeddings.embeddings().clone())
        } else {
            Linear::new(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?
        };

        Ok(Self {
            embeddings,
            layers,
            final_norm,
            lm_head,
            device,
            dtype,
            max_seq_len,
        })
    }
}

/// A Llama checkpoint ready for generation.
///
/// Cloning is cheap; clones share the same weights.
#[derive(Clone)]
pub struct LlamaModel {
    weights: Arc<ModelWeights>,
    config: LlamaConfig,
    generation_config: GenerationConfig,
}

impl LlamaModel {
    pub fn new(
        config: LlamaConfig,
        generation_config: GenerationConfig,
        vb: VarBuilder,
    ) -> anyhow::Result<Self> {
        let weights = Arc::new(ModelWeights::load(&config, vb)?);
        Ok(Self {
            weights,
            config,
            generation_config,
        })
    }

    /// Download (or reuse from the hub cache) and load a checkpoint.
    pub async fn from_pretrained(
        model_id: &str,
        precision: Precision,
        device: &Device,
    ) -> anyhow::Result<Self> {
        let config: LlamaConfig = ConfigLoader::new(model_id, "config.json").load().await?;
        Self::from_config(model_id, config, precision, device).await
    }

    /// Load weights for an already fetched `config.json`.
    pub async fn from_config(
        model_id: &str,
        config: LlamaConfig,
        precision: Precision,
        device: &Device,
    ) -> anyhow::Result<Self> {
        let generation_config = match GenerationConfigLoader::new(model_id, "generation_config.json")
            .load()
            .await
        {
            Ok(generation_config) => generation_config,
            Err(e) => {
                tracing::warn!(%model_id, error = %e, "no generation_config.json, using defaults");
                GenerationConfig::default()
            }
        };

        let weight_files = SafetensorsLoader::new(model_id).load().await?;

        let dtype = precision.dtype_on(device);
        tracing::info!(%model_id, %precision, ?dtype, ?device, "loading model (this might take a while)");
        // SAFETY: the files live in the hub cache and are not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weight_files, dtype, device)? };
        let model = Self::new(config, generation_config, vb)?;
        tracing::info!(%model_id, layers = model.weights.layers.len(), "model loaded");

        Ok(model)
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.weights.device
    }

    pub fn dtype(&self) -> DType {
        self.weights.dtype
    }

    pub fn max_seq_len(&self) -> usize {
        self.weights.max_seq_len
    }

    /// Ids that end generation: `generation_config.json` wins over `config.json`.
    pub fn eos_token_ids(&self) -> Vec<u32> {
        if self.generation_config.eos_token_ids.is_empty() {
            self.config.eos_token_ids()
        } else {
            self.generation_config.eos_token_ids.clone()
        }
    }

    pub fn default_generation_params(&self) -> GenerationParams {
        GenerationParams::from_generation_config(&self.generation_config)
    }

    /// Create a new inference context with this model.
    /// Each context maintains its own KV cache and position tracking.
    pub fn new_context(&self) -> Context {
        Context::new(self.weights.clone())
    }
}

/// A single inference context with independent state.
/// Multiple contexts can share the same model weights.
pub struct Context {
    weights: Arc<ModelWeights>,
    kv_caches: Vec<KvCache>,
    position: usize,
}

impl Context {
    pub fn new(weights: Arc<ModelWeights>) -> Self {
        let kv_caches = (0..weights.layers.len()).map(|_| KvCache::new()).collect();

        Self {
            weights,
            kv_caches,
            position: 0,
        }
    }

    /// Feed `[batch, seq_len]` token ids and return `[batch, vocab]` f32 logits
    /// for the token after the last one.
    pub fn generate(&mut self, input_ids: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len) = input_ids.dims2()?;
        let position_offset = self.position;

        let mut hidden_states = self.weights.embeddings.forward(input_ids)?;

        let attention_mask = if seq_len > 1 {
            Some(causal_mask(
                batch_size,
                seq_len,
                position_offset,
                &self.weights.device,
            )?)
        } else {
            None
        };

        for (layer, kv_cache) in self.weights.layers.iter().zip(self.kv_caches.iter_mut()) {
            hidden_states =
                layer.forward(&hidden_states, attention_mask.as_ref(), position_offset, kv_cache)?;
        }

        hidden_states = self.weights.final_norm.forward(&hidden_states)?;

        let last_hidden = hidden_states.narrow(1, seq_len - 1, 1)?;
        let logits = self
            .weights
            .lm_head
            .forward(&last_hidden)?
            .squeeze(1)?
            .to_dtype(DType::F32)?;

        self.position += seq_len;

        Ok(logits)
    }

    pub fn reset(&mut self) {
        for cache in &mut self.kv_caches {
            cache.reset();
        }
        self.position = 0;
    }

    pub fn current_position(&self) -> usize {
        self.position
    }
}

impl LanguageModelContext for Context {
    fn generate(&mut self, input: &Tensor) -> Result<Tensor> {
        Context::generate(self, input)
    }

    fn reset(&mut self) {
        Context::reset(self);
    }

    fn position(&self) -> usize {
        self.position
    }
}

#[async_trait]
impl TextGenerationModel for LlamaModel {
    type Context = Context;

    async fn load(model_id: &str, precision: Precision, device: &Device) -> anyhow::Result<Self> {
        Self::from_pretrained(model_id, precision, device).await
    }

    fn device(&self) -> &Device {
        LlamaModel::device(self)
    }

    fn get_eos_tokens(&self) -> Vec<u32> {
        self.eos_token_ids()
    }

    fn get_max_seq_len(&self) -> usize {
        self.max_seq_len()
    }

    fn new_context(&self) -> Self::Context {
        LlamaModel::new_context(self)
    }

    fn default_generation_params(&self) -> GenerationParams {
        LlamaModel::default_generation_params(self)
    }
}
