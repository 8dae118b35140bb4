pub mod llama;

pub use llama::{LlamaConfig, LlamaModel};
