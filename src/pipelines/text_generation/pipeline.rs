use super::model::TextGenerationModel;
use crate::auto::{AutoModelForCausalLM, AutoTokenizer};
use crate::core::Message;
use crate::models::generation::{generate_tokens, GenerationParams};

/// Input for a text-generation request.
#[derive(Debug, Clone)]
pub enum Input<'a> {
    /// A raw prompt string, sent as a single user message.
    Prompt(&'a str),
    /// A sequence of chat messages.
    Messages(&'a [Message]),
}

impl<'a> From<&'a str> for Input<'a> {
    fn from(s: &'a str) -> Self {
        Self::Prompt(s)
    }
}

impl<'a> From<&'a [Message]> for Input<'a> {
    fn from(m: &'a [Message]) -> Self {
        Self::Messages(m)
    }
}

impl<'a> From<&'a Vec<Message>> for Input<'a> {
    fn from(v: &'a Vec<Message>) -> Self {
        Self::Messages(v.as_slice())
    }
}

/// Result of [`TextGenerationPipeline::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextGenerationOutput {
    /// The input conversation followed by the assistant reply.
    pub generated_text: Vec<Message>,
}

/// Chat-in, chat-out text generation over a tokenizer and a causal LM.
///
/// Every call starts from an empty context; nothing is carried between calls.
pub struct TextGenerationPipeline<M: TextGenerationModel = AutoModelForCausalLM> {
    model: M,
    tokenizer: AutoTokenizer,
    gen_params: GenerationParams,
}

impl<M: TextGenerationModel> TextGenerationPipeline<M> {
    pub fn new(model: M, tokenizer: AutoTokenizer, gen_params: GenerationParams) -> Self {
        Self {
            model,
            tokenizer,
            gen_params,
        }
    }

    /// Continue `messages` with one assistant turn.
    pub fn run(&self, messages: &[Message]) -> anyhow::Result<TextGenerationOutput> {
        let reply = self.message_completion_internal(messages)?;

        let mut generated_text = messages.to_vec();
        generated_text.push(Message::assistant(reply));
        Ok(TextGenerationOutput { generated_text })
    }

    /// Generate a completion from either a prompt or a chat history.
    /// Returns only the reply text.
    pub fn completion<'a>(&self, input: impl Into<Input<'a>>) -> anyhow::Result<String> {
        match input.into() {
            Input::Prompt(p) => self.message_completion_internal(&[Message::user(p)]),
            Input::Messages(m) => self.message_completion_internal(m),
        }
    }

    fn message_completion_internal(&self, messages: &[Message]) -> anyhow::Result<String> {
        let prompt_tokens = self.tokenizer.encode_chat(messages, true)?;
        self.completion_from_tokens(&prompt_tokens)
    }

    fn completion_from_tokens(&self, prompt_tokens: &[u32]) -> anyhow::Result<String> {
        let mut context = self.model.new_context();
        let generated_tokens = generate_tokens(
            &mut context,
            prompt_tokens,
            &self.gen_params,
            &self.model.get_eos_tokens(),
            self.model.get_max_seq_len(),
            self.model.device(),
        )?;

        self.tokenizer.decode(&generated_tokens, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto::{ChatTemplateOptions, GenerateOptions};
    use crate::core::{MessageVecExt, ModelError, Role};
    use crate::runners::new_tokens;
    use crate::models::implementations::llama::LlamaModel;
    use crate::test_support::{tiny_llama, tiny_tokenizer};

    fn pipeline(max_new_tokens: usize) -> TextGenerationPipeline<LlamaModel> {
        let model = tiny_llama();
        let gen_params = GenerationParams {
            max_new_tokens,
            ..model.default_generation_params()
        };
        TextGenerationPipeline::new(model, tiny_tokenizer(), gen_params)
    }

    #[test]
    fn test_run_appends_assistant_reply() -> anyhow::Result<()> {
        let messages = vec![Message::user("Who are you?")];
        let output = pipeline(3).run(&messages)?;

        assert_eq!(output.generated_text.len(), 2);
        assert_eq!(output.generated_text[0], messages[0]);
        assert_eq!(output.generated_text[1].role(), Role::Assistant);
        assert_eq!(output.generated_text.last_content(), Some("hello hello hello"));
        Ok(())
    }

    #[test]
    fn test_prompt_and_messages_agree() -> anyhow::Result<()> {
        let pipeline = pipeline(2);
        let from_prompt = pipeline.completion("Who are you?")?;
        let from_messages = pipeline.completion(&vec![Message::user("Who are you?")])?;
        assert_eq!(from_prompt, from_messages);
        Ok(())
    }

    #[test]
    fn test_reply_matches_direct_decode() -> anyhow::Result<()> {
        let messages = [Message::user("Who are you?")];
        let tokenizer = tiny_tokenizer();
        let model = AutoModelForCausalLM::from(tiny_llama());
        let inputs = tokenizer.apply_chat_template(
            &messages,
            ChatTemplateOptions::default(),
            model.device(),
        )?;
        let prompt_len = inputs.input_ids.dim(1)?;
        let outputs = model.generate(&inputs, GenerateOptions { max_new_tokens: 2 })?;
        let direct = tokenizer.decode(&new_tokens(&outputs, prompt_len)?, true)?;

        assert_eq!(pipeline(2).completion(&messages[..])?, direct);
        Ok(())
    }

    #[test]
    fn test_overflow_is_reported() {
        let err = pipeline(1_000)
            .run(&[Message::user("Who are you?")])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::ContextOverflow { .. })
        ));
    }
}
