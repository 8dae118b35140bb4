use crate::core::Precision;
use crate::models::generation::GenerationParams;
use async_trait::async_trait;
use candle_core::{Device, Tensor};

/// Minimal interface required by the text-generation pipeline for a model context.
pub trait LanguageModelContext: Send {
    /// Forward the input tokens through the model, returning the logits for the
    /// next token.
    fn generate(&mut self, input: &Tensor) -> candle_core::Result<Tensor>;

    /// Clear the internal state (kv-cache, position, etc.).
    fn reset(&mut self);

    /// Get the current position (number of cached tokens).
    fn position(&self) -> usize;
}

#[async_trait]
pub trait TextGenerationModel: Send + Sync {
    /// The context type that will be returned by `new_context` and consumed by
    /// the pipeline.
    type Context: LanguageModelContext;

    /// Fetch the checkpoint `model_id` and materialize it on `device`.
    async fn load(model_id: &str, precision: Precision, device: &Device) -> anyhow::Result<Self>
    where
        Self: Sized;

    fn device(&self) -> &Device;

    /// Get all EOS token IDs for robust termination detection
    fn get_eos_tokens(&self) -> Vec<u32>;

    fn get_max_seq_len(&self) -> usize;

    fn new_context(&self) -> Self::Context;

    /// Get the default generation parameters for this model.
    fn default_generation_params(&self) -> GenerationParams {
        GenerationParams::default()
    }
}
