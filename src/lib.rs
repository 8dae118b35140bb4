pub mod auto;
pub mod core;
pub mod loaders;
pub mod models;
pub mod pipelines;
pub mod runners;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export core types
pub use crate::core::{Message, MessageVecExt, ModelError, Precision, Role};

pub use auto::{AutoModelForCausalLM, AutoTokenizer, ChatTemplateOptions, GenerateOptions, ModelInputs};
pub use pipelines::text_generation::{TextGenerationOutput, TextGenerationPipeline, TextGenerationPipelineBuilder};
pub use pipelines::utils::{DeviceMap, DeviceSelectable};
