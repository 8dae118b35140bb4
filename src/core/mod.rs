pub mod config;
pub mod error;
pub mod message;

pub use config::{GenerationConfig, Precision};
pub use error::ModelError;
pub use message::{Message, MessageVecExt, Role};
