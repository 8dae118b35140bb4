use thiserror::Error;

/// Failures detected by this crate itself, as opposed to errors bubbled up
/// from the hub client, the tokenizer or the tensor backend.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model identifier is not of the form `name` or `owner/name`.
    #[error("invalid model identifier '{0}': expected 'owner/name'")]
    InvalidModelId(String),

    /// `config.json` names an architecture without an implementation here.
    #[error("unsupported architecture(s) {0:?}: only the Llama family is implemented")]
    UnsupportedArchitecture(Vec<String>),

    /// `tokenizer_config.json` carries no `chat_template`.
    #[error("model '{0}' does not define a chat template")]
    MissingChatTemplate(String),

    /// The chat template rendered to zero tokens.
    #[error("the templated prompt is empty")]
    EmptyPrompt,

    /// Prompt plus token budget does not fit the positional tables.
    #[error("prompt of {prompt} tokens plus {max_new_tokens} new tokens exceeds the context length of {max_seq_len}")]
    ContextOverflow {
        prompt: usize,
        max_new_tokens: usize,
        max_seq_len: usize,
    },

    /// Neither a sharded index nor a single safetensors file was found.
    #[error("no safetensors weights found in '{0}'")]
    MissingWeights(String),
}
