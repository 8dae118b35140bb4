//! The two smoke-test paths. Each catches its own failure and reports it on
//! the output stream; neither ever returns an inference error to the caller.

use crate::auto::{AutoModelForCausalLM, AutoTokenizer, ChatTemplateOptions, GenerateOptions};
use crate::core::{Message, MessageVecExt, Precision};
use crate::models::generation::params::DEFAULT_MAX_NEW_TOKENS;
use crate::pipelines::text_generation::TextGenerationPipelineBuilder;
use crate::pipelines::utils::{DeviceMap, DeviceSelectable};
use std::io::Write;

/// Checkpoint exercised by the tester.
pub const MODEL_ID: &str = "meta-llama/Llama-3.2-3B-Instruct";
pub const DEFAULT_PROMPT: &str = "Who are you?";

#[derive(Debug, Clone)]
pub struct TesterConfig {
    pub model_id: String,
    pub prompt: String,
    pub max_new_tokens: usize,
    pub precision: Precision,
    pub device_map: DeviceMap,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            model_id: MODEL_ID.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            precision: Precision::BF16,
            device_map: DeviceMap::Auto,
        }
    }
}

impl TesterConfig {
    /// A fresh single-message conversation.
    fn messages(&self) -> Vec<Message> {
        vec![Message::user(self.prompt.as_str())]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    Pipeline,
    Direct,
}

impl RunnerKind {
    /// Runners invoked by the binary.
    pub const ENABLED: &'static [RunnerKind] = &[RunnerKind::Pipeline];

    pub async fn run(self, config: &TesterConfig, out: &mut impl Write) -> std::io::Result<()> {
        match self {
            RunnerKind::Pipeline => PipelineRunner::new(config.clone()).run(out).await,
            RunnerKind::Direct => DirectRunner::new(config.clone()).run(out).await,
        }
    }
}

/// High-level path: one text-generation pipeline call.
pub struct PipelineRunner {
    config: TesterConfig,
}

impl PipelineRunner {
    pub fn new(config: TesterConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "\n--- Testing with text-generation pipeline ({}) ---", self.config.model_id)?;
        match self.generate().await {
            Ok(response) => writeln!(out, "Response: {response}"),
            Err(e) => {
                tracing::debug!(error = ?e, "pipeline runner failed");
                writeln!(out, "Error in pipeline: {e:#}")
            }
        }
    }

    async fn generate(&self) -> anyhow::Result<String> {
        let pipeline = TextGenerationPipelineBuilder::new(self.config.model_id.as_str())
            .precision(self.config.precision)
            .device_map(self.config.device_map)
            .max_new_tokens(self.config.max_new_tokens)
            .build()
            .await?;

        let output = pipeline.run(&self.config.messages())?;
        output
            .generated_text
            .last_content()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("pipeline returned an empty conversation"))
    }
}

/// Low-level path: tokenizer and model loaded separately, only the new
/// tokens decoded.
pub struct DirectRunner {
    config: TesterConfig,
}

impl DirectRunner {
    pub fn new(config: TesterConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "\n--- Testing with Direct Model Loading ({}) ---", self.config.model_id)?;
        match self.generate().await {
            Ok(response) => writeln!(out, "Response: {response}"),
            Err(e) => {
                tracing::debug!(error = ?e, "direct runner failed");
                writeln!(out, "Error in direct loading: {e:#}")
            }
        }
    }

    async fn generate(&self) -> anyhow::Result<String> {
        let TesterConfig {
            model_id,
            precision,
            device_map,
            max_new_tokens,
            ..
        } = &self.config;

        let tokenizer = AutoTokenizer::from_pretrained(model_id).await?;
        let model = AutoModelForCausalLM::from_pretrained(model_id, *precision, *device_map).await?;

        let inputs = tokenizer.apply_chat_template(
            &self.config.messages(),
            ChatTemplateOptions {
                add_generation_prompt: true,
            },
            model.device(),
        )?;
        let outputs = model.generate(
            &inputs,
            GenerateOptions {
                max_new_tokens: *max_new_tokens,
            },
        )?;

        let new_tokens = new_tokens(&outputs, inputs.input_ids.dim(1)?)?;
        tokenizer.decode(&new_tokens, true)
    }
}

/// Ids of the first sequence in `outputs` past the first `prompt_len`.
pub fn new_tokens(outputs: &candle_core::Tensor, prompt_len: usize) -> anyhow::Result<Vec<u32>> {
    let sequence: Vec<u32> = outputs.get(0)?.to_vec1()?;
    match sequence.get(prompt_len..) {
        Some(new_tokens) => Ok(new_tokens.to_vec()),
        None => anyhow::bail!(
            "output of {} tokens is shorter than the {prompt_len}-token prompt",
            sequence.len()
        ),
    }
}
