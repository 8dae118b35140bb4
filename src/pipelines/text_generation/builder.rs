use super::model::TextGenerationModel;
use super::pipeline::TextGenerationPipeline;
use crate::auto::{AutoModelForCausalLM, AutoTokenizer};
use crate::core::Precision;
use crate::models::generation::GenerationParams;
use crate::pipelines::utils::{DeviceMap, DeviceSelectable};
use std::marker::PhantomData;

/// Builder for text generation pipelines.
///
/// Sampling options left unset fall back to the checkpoint's
/// `generation_config.json`.
pub struct TextGenerationPipelineBuilder<M: TextGenerationModel = AutoModelForCausalLM> {
    model_id: String,
    precision: Precision,
    temperature: Option<f64>,
    repeat_penalty: Option<f32>,
    repeat_last_n: Option<usize>,
    seed: Option<u64>,
    max_new_tokens: Option<usize>,
    top_p: Option<f64>,
    top_k: Option<usize>,
    device_map: DeviceMap,
    _model: PhantomData<M>,
}

impl TextGenerationPipelineBuilder {
    /// Pipeline over whichever implementation `config.json` of `model_id` selects.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self::for_model(model_id)
    }
}

impl<M: TextGenerationModel> TextGenerationPipelineBuilder<M> {
    /// Pipeline over a specific model implementation.
    pub fn for_model(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            precision: Precision::default(),
            temperature: None,
            repeat_penalty: None,
            repeat_last_n: None,
            seed: None,
            max_new_tokens: None,
            top_p: None,
            top_k: None,
            device_map: DeviceMap::default(),
            _model: PhantomData,
        }
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn repeat_penalty(mut self, repeat_penalty: f32) -> Self {
        self.repeat_penalty = Some(repeat_penalty);
        self
    }

    pub fn repeat_last_n(mut self, repeat_last_n: usize) -> Self {
        self.repeat_last_n = Some(repeat_last_n);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = Some(max_new_tokens);
        self
    }

    pub fn top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p.clamp(0.0, 1.0));
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Overlay the options set on this builder onto `defaults`.
    fn generation_params(&self, defaults: GenerationParams) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            repeat_penalty: self.repeat_penalty.unwrap_or(defaults.repeat_penalty),
            repeat_last_n: self.repeat_last_n.unwrap_or(defaults.repeat_last_n),
            seed: self.seed.unwrap_or(defaults.seed),
            max_new_tokens: self.max_new_tokens.unwrap_or(defaults.max_new_tokens),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            top_k: self.top_k.unwrap_or(defaults.top_k),
        }
    }

    pub async fn build(self) -> anyhow::Result<TextGenerationPipeline<M>> {
        let device = self.device_map.resolve()?;
        tracing::info!(
            model_id = %self.model_id,
            precision = %self.precision,
            ?device,
            "building text-generation pipeline"
        );

        let tokenizer = AutoTokenizer::from_pretrained(&self.model_id).await?;
        let model = M::load(&self.model_id, self.precision, &device).await?;

        let gen_params = self.generation_params(model.default_generation_params());
        tracing::debug!(?gen_params, "generation parameters");

        Ok(TextGenerationPipeline::new(model, tokenizer, gen_params))
    }
}

impl<M: TextGenerationModel> DeviceSelectable for TextGenerationPipelineBuilder<M> {
    fn device_map_mut(&mut self) -> &mut DeviceMap {
        &mut self.device_map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::implementations::llama::LlamaModel;

    #[test]
    fn test_unset_options_keep_checkpoint_defaults() {
        let defaults = GenerationParams {
            temperature: 0.6,
            top_p: 0.9,
            ..Default::default()
        };
        let params = TextGenerationPipelineBuilder::new("meta-llama/Llama-3.2-3B-Instruct")
            .max_new_tokens(100)
            .seed(7)
            .generation_params(defaults);

        assert_eq!(params.temperature, 0.6);
        assert_eq!(params.top_p, 0.9);
        assert_eq!(params.max_new_tokens, 100);
        assert_eq!(params.seed, 7);
    }

    #[test]
    fn test_top_p_is_clamped() {
        let params = TextGenerationPipelineBuilder::<LlamaModel>::for_model("org/model")
            .top_p(1.5)
            .generation_params(GenerationParams::default());
        assert_eq!(params.top_p, 1.0);
    }

    #[tokio::test]
    async fn test_invalid_model_id_fails_to_build() {
        let result = TextGenerationPipelineBuilder::new("not a model id!")
            .precision(Precision::F32)
            .cpu()
            .build()
            .await;
        assert!(result.is_err());
    }
}
