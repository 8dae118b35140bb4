//! Checkpoint-agnostic entry points: a tokenizer bundled with its chat
//! template, and a causal LM chosen from `config.json`.

use crate::core::{Message, ModelError, Precision};
use crate::loaders::{ConfigLoader, TokenizerConfigLoader, TokenizerLoader};
use crate::models::chat_template::ChatTemplate;
use crate::models::generation::{generate_tokens, params::DEFAULT_MAX_NEW_TOKENS, GenerationParams};
use crate::models::implementations::llama::{self, LlamaConfig, LlamaModel};
use crate::pipelines::text_generation::model::{LanguageModelContext, TextGenerationModel};
use crate::pipelines::utils::DeviceMap;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use serde::Deserialize;
use tokenizers::Tokenizer;

/// Options for [`AutoTokenizer::apply_chat_template`].
#[derive(Debug, Clone, Copy)]
pub struct ChatTemplateOptions {
    /// End the prompt with the header that opens an assistant turn.
    pub add_generation_prompt: bool,
}

impl Default for ChatTemplateOptions {
    fn default() -> Self {
        Self {
            add_generation_prompt: true,
        }
    }
}

/// Tokenized model input of shape `(1, prompt_len)`.
#[derive(Debug, Clone)]
pub struct ModelInputs {
    pub input_ids: Tensor,
}

/// Options for [`AutoModelForCausalLM::generate`].
#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub max_new_tokens: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

/// A `tokenizers` tokenizer together with the checkpoint's chat template.
#[derive(Debug, Clone)]
pub struct AutoTokenizer {
    tokenizer: Tokenizer,
    chat_template: std::sync::Arc<ChatTemplate>,
}

impl AutoTokenizer {
    /// Load `tokenizer.json` and `tokenizer_config.json` of `model_id`.
    pub async fn from_pretrained(model_id: &str) -> anyhow::Result<Self> {
        let tokenizer = TokenizerLoader::new(model_id, "tokenizer.json").load().await?;
        let tokenizer_config = TokenizerConfigLoader::new(model_id, "tokenizer_config.json")
            .load()
            .await?;
        let chat_template = ChatTemplate::from_tokenizer_config(model_id, &tokenizer_config)?;

        tracing::info!(%model_id, vocab_size = tokenizer.get_vocab_size(true), "tokenizer loaded");
        Ok(Self::from_parts(tokenizer, chat_template))
    }

    pub fn from_parts(tokenizer: Tokenizer, chat_template: ChatTemplate) -> Self {
        Self {
            tokenizer,
            chat_template: std::sync::Arc::new(chat_template),
        }
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn chat_template(&self) -> &ChatTemplate {
        &self.chat_template
    }

    pub fn bos_token(&self) -> &str {
        self.chat_template.bos_token()
    }

    pub fn eos_token(&self) -> &str {
        self.chat_template.eos_token()
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    pub fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        Ok(self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(anyhow::Error::msg)?
            .get_ids()
            .to_vec())
    }

    /// Render `messages` with the chat template and tokenize the result.
    ///
    /// The template already emits the BOS token, so the tokenizer is told not
    /// to add special tokens a second time.
    pub fn encode_chat(
        &self,
        messages: &[Message],
        add_generation_prompt: bool,
    ) -> anyhow::Result<Vec<u32>> {
        let prompt = self.chat_template.render(messages, add_generation_prompt)?;
        tracing::trace!(%prompt, "rendered chat template");
        self.encode(&prompt, false)
    }

    /// Tokenized chat prompt as a `(1, prompt_len)` tensor on `device`.
    pub fn apply_chat_template(
        &self,
        messages: &[Message],
        options: ChatTemplateOptions,
        device: &Device,
    ) -> anyhow::Result<ModelInputs> {
        let ids = self.encode_chat(messages, options.add_generation_prompt)?;
        let input_ids = Tensor::new(ids.as_slice(), device)?.unsqueeze(0)?;
        Ok(ModelInputs { input_ids })
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> anyhow::Result<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(anyhow::Error::msg)
    }
}

#[derive(Deserialize)]
struct ArchitectureProbe {
    #[serde(default)]
    architectures: Vec<String>,
    model_type: Option<String>,
}

/// A causal language model whose implementation is picked from the
/// checkpoint's `config.json`.
#[derive(Clone)]
pub enum AutoModelForCausalLM {
    Llama(LlamaModel),
}

impl AutoModelForCausalLM {
    /// Half precisions load in f32 when `device_map` resolves to the CPU.
    pub async fn from_pretrained(
        model_id: &str,
        precision: Precision,
        device_map: DeviceMap,
    ) -> anyhow::Result<Self> {
        let device = device_map.resolve()?;
        Self::load_on(model_id, precision, &device).await
    }

    async fn load_on(model_id: &str, precision: Precision, device: &Device) -> anyhow::Result<Self> {
        let config: serde_json::Value = ConfigLoader::new(model_id, "config.json").load().await?;
        let probe: ArchitectureProbe = serde_json::from_value(config.clone())?;

        if llama::is_llama(&probe.architectures, probe.model_type.as_deref()) {
            let config: LlamaConfig = serde_json::from_value(config)?;
            let model = LlamaModel::from_config(model_id, config, precision, device).await?;
            return Ok(Self::Llama(model));
        }

        Err(ModelError::UnsupportedArchitecture(probe.architectures).into())
    }

    pub fn device(&self) -> &Device {
        match self {
            Self::Llama(model) => model.device(),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Self::Llama(model) => model.dtype(),
        }
    }

    /// Generate a continuation of `inputs.input_ids`.
    ///
    /// Returns a `(1, prompt_len + new_tokens)` tensor: the prompt followed by
    /// the generated ids, the last one being an EOS id when generation stopped
    /// before the budget.
    pub fn generate(&self, inputs: &ModelInputs, options: GenerateOptions) -> anyhow::Result<Tensor> {
        let (batch_size, _) = inputs.input_ids.dims2()?;
        if batch_size != 1 {
            anyhow::bail!("batched generation is not supported (got batch size {batch_size})");
        }
        let prompt_tokens: Vec<u32> = inputs
            .input_ids
            .to_dtype(DType::U32)?
            .squeeze(0)?
            .to_vec1()?;

        let params = GenerationParams {
            max_new_tokens: options.max_new_tokens,
            ..TextGenerationModel::default_generation_params(self)
        };
        let mut context = TextGenerationModel::new_context(self);
        let new_tokens = generate_tokens(
            &mut context,
            &prompt_tokens,
            &params,
            &self.get_eos_tokens(),
            self.get_max_seq_len(),
            self.device(),
        )?;

        let mut all_tokens = prompt_tokens;
        all_tokens.extend(new_tokens);
        Ok(Tensor::new(all_tokens.as_slice(), self.device())?.unsqueeze(0)?)
    }
}

impl From<LlamaModel> for AutoModelForCausalLM {
    fn from(model: LlamaModel) -> Self {
        Self::Llama(model)
    }
}

/// Inference state of an [`AutoModelForCausalLM`].
pub enum AutoContext {
    Llama(llama::Context),
}

impl LanguageModelContext for AutoContext {
    fn generate(&mut self, input: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Llama(context) => context.generate(input),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Llama(context) => context.reset(),
        }
    }

    fn position(&self) -> usize {
        match self {
            Self::Llama(context) => context.current_position(),
        }
    }
}

#[async_trait]
impl TextGenerationModel for AutoModelForCausalLM {
    type Context = AutoContext;

    async fn load(model_id: &str, precision: Precision, device: &Device) -> anyhow::Result<Self> {
        Self::load_on(model_id, precision, device).await
    }

    fn device(&self) -> &Device {
        AutoModelForCausalLM::device(self)
    }

    fn get_eos_tokens(&self) -> Vec<u32> {
        match self {
            Self::Llama(model) => model.eos_token_ids(),
        }
    }

    fn get_max_seq_len(&self) -> usize {
        match self {
            Self::Llama(model) => model.max_seq_len(),
        }
    }

    fn new_context(&self) -> AutoContext {
        match self {
            Self::Llama(model) => AutoContext::Llama(model.new_context()),
        }
    }

    fn default_generation_params(&self) -> GenerationParams {
        match self {
            Self::Llama(model) => model.default_generation_params(),
        }
    }
}
