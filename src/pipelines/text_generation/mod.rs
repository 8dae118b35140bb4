//! Text generation pipeline.
//!
//! ```rust,no_run
//! use sbk_model_tester::pipelines::text_generation::TextGenerationPipelineBuilder;
//! use sbk_model_tester::pipelines::utils::{DeviceMap, DeviceSelectable};
//! use sbk_model_tester::{Message, Precision};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let pipeline = TextGenerationPipelineBuilder::new("meta-llama/Llama-3.2-3B-Instruct")
//!     .precision(Precision::BF16)
//!     .device_map(DeviceMap::Auto)
//!     .max_new_tokens(100)
//!     .build()
//!     .await?;
//!
//! let output = pipeline.run(&[Message::user("Who are you?")])?;
//! println!("{}", output.generated_text[1].content());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod model;
pub mod pipeline;

pub use builder::TextGenerationPipelineBuilder;
pub use model::{LanguageModelContext, TextGenerationModel};
pub use pipeline::{Input, TextGenerationOutput, TextGenerationPipeline};
