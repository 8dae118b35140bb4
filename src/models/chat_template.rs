//! Hugging Face Jinja chat templates rendered with `minijinja`.

use crate::core::{Message, ModelError};
use crate::loaders::TokenizerConfig;
use minijinja::{context, Environment, ErrorKind, UndefinedBehavior};
use minijinja_contrib::pycompat;
use std::fmt::Write as _;

/// A compiled chat template together with the special tokens it references.
pub struct ChatTemplate {
    environment: Environment<'static>,
    bos_token: String,
    eos_token: String,
}

impl std::fmt::Debug for ChatTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatTemplate")
            .field("bos_token", &self.bos_token)
            .field("eos_token", &self.eos_token)
            .finish_non_exhaustive()
    }
}

impl ChatTemplate {
    pub fn new(
        template: impl Into<String>,
        bos_token: impl Into<String>,
        eos_token: impl Into<String>,
    ) -> Result<Self, minijinja::Error> {
        // Python slice and negative-index forms minijinja does not evaluate the same way.
        let template = template
            .into()
            .replace("messages[::-1]", "messages|reverse")
            .replace("messages[-1]", "messages[(messages|length - 1)]");

        let mut environment = Environment::new();
        environment.set_undefined_behavior(UndefinedBehavior::Lenient);
        environment.set_unknown_method_callback(pycompat::unknown_method_callback);

        environment.add_function("raise_exception", |err_text: String| -> Result<String, minijinja::Error> {
            Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("The template raised an exception: {err_text}"),
            ))
        });
        environment.add_function("strftime_now", |format: String| -> Result<String, minijinja::Error> {
            let mut out = String::new();
            write!(out, "{}", chrono::Local::now().format(&format)).map_err(|_| {
                minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    format!("invalid strftime format '{format}'"),
                )
            })?;
            Ok(out)
        });

        environment.add_template_owned("chat", template)?;

        Ok(Self {
            environment,
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        })
    }

    /// Build the template a checkpoint ships in its `tokenizer_config.json`.
    pub fn from_tokenizer_config(model_id: &str, config: &TokenizerConfig) -> anyhow::Result<Self> {
        let template = config
            .chat_template
            .clone()
            .ok_or_else(|| ModelError::MissingChatTemplate(model_id.to_string()))?;

        Ok(Self::new(
            template,
            config.bos_token.clone().unwrap_or_default(),
            config.eos_token.clone().unwrap_or_default(),
        )?)
    }

    /// Render `messages` into the prompt string the model was trained on.
    ///
    /// With `add_generation_prompt` the output ends with the header that opens
    /// an assistant turn.
    pub fn render(
        &self,
        messages: &[Message],
        add_generation_prompt: bool,
    ) -> Result<String, minijinja::Error> {
        self.environment.get_template("chat")?.render(context! {
            messages => messages,
            bos_token => &self.bos_token,
            eos_token => &self.eos_token,
            add_generation_prompt => add_generation_prompt,
            tools => minijinja::Value::from(()),
        })
    }

    pub fn bos_token(&self) -> &str {
        &self.bos_token
    }

    pub fn eos_token(&self) -> &str {
        &self.eos_token
    }
}
