pub mod attention;
pub mod layers;
pub mod rope;

pub use attention::{causal_mask, repeat_kv, Attention, AttentionConfig, FeedForward, KvCache};
pub use layers::{Embedding, Linear, RmsNorm};
pub use rope::{LlamaRoPEParams, RoPE, RoPEParams, RopeScaling};
