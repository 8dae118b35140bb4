pub mod logits;
pub mod params;
pub mod sampling;

pub use logits::apply_repeat_penalty;
pub use params::GenerationParams;
pub use sampling::{initialize_logits_processor, LogitsProcessor, Sampling};

use crate::core::ModelError;
use crate::pipelines::text_generation::model::LanguageModelContext;
use candle_core::{Device, Tensor};

/// Prompt tokens fed to the context per forward pass during prefill.
const PREFILL_CHUNK_SIZE: usize = 64;

/// Run prefill over `prompt_tokens`, then sample until an EOS id is produced
/// or `params.max_new_tokens` tokens exist.
///
/// The returned tokens are only the newly generated ones; a terminating EOS id
/// is kept as the final element.
pub fn generate_tokens<C: LanguageModelContext>(
    context: &mut C,
    prompt_tokens: &[u32],
    params: &GenerationParams,
    eos_tokens: &[u32],
    max_seq_len: usize,
    device: &Device,
) -> anyhow::Result<Vec<u32>> {
    if prompt_tokens.is_empty() {
        return Err(ModelError::EmptyPrompt.into());
    }
    if context.position() + prompt_tokens.len() + params.max_new_tokens > max_seq_len {
        return Err(ModelError::ContextOverflow {
            prompt: context.position() + prompt_tokens.len(),
            max_new_tokens: params.max_new_tokens,
            max_seq_len,
        }
        .into());
    }

    let mut generated_tokens: Vec<u32> = Vec::with_capacity(params.max_new_tokens);
    if params.max_new_tokens == 0 {
        return Ok(generated_tokens);
    }

    let mut logits_processor = initialize_logits_processor(params);
    let started = std::time::Instant::now();

    let mut last_logits = None;
    for chunk in prompt_tokens.chunks(PREFILL_CHUNK_SIZE) {
        let input = Tensor::new(chunk, device)?.unsqueeze(0)?;
        last_logits = Some(context.generate(&input)?.squeeze(0)?);
    }
    let logits = last_logits.ok_or(ModelError::EmptyPrompt)?;

    let mut next_token = logits_processor.sample(&logits)?;
    generated_tokens.push(next_token);

    while generated_tokens.len() < params.max_new_tokens && !eos_tokens.contains(&next_token) {
        let input = Tensor::new(&[next_token], device)?.unsqueeze(0)?;
        let logits = context.generate(&input)?.squeeze(0)?;

        let start_at = generated_tokens.len().saturating_sub(params.repeat_last_n);
        let penalty_context = &generated_tokens[start_at..];

        let logits = if params.repeat_penalty <= 1. || penalty_context.is_empty() {
            logits
        } else {
            apply_repeat_penalty(&logits, params.repeat_penalty, penalty_context)?
        };

        next_token = logits_processor.sample(&logits)?;
        generated_tokens.push(next_token);
    }

    let elapsed = started.elapsed();
    tracing::debug!(
        prompt_tokens = prompt_tokens.len(),
        new_tokens = generated_tokens.len(),
        tokens_per_second = generated_tokens.len() as f64 / elapsed.as_secs_f64().max(1e-9),
        "generation finished"
    );

    Ok(generated_tokens)
}
