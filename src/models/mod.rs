pub mod chat_template;
pub mod components;
pub mod generation;
pub mod implementations;

pub use chat_template::ChatTemplate;
pub use implementations::llama::{LlamaConfig, LlamaModel};
