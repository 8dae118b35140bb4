use crate::core::GenerationConfig;

/// Default seed for the sampling RNG.
pub const DEFAULT_SEED: u64 = 299792458;
/// Default number of newly generated tokens.
pub const DEFAULT_MAX_NEW_TOKENS: usize = 100;

/// Generation parameters for language models.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// `0.0` selects greedy decoding.
    pub temperature: f64,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
    pub seed: u64,
    pub max_new_tokens: usize,
    pub top_p: f64,   // 0.0..=1.0 ; 0 or 1 means disabled
    pub top_k: usize, // 0 means disabled
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            repeat_penalty: 1.0,
            repeat_last_n: 64,
            seed: DEFAULT_SEED,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            top_p: 1.0,
            top_k: 0,
        }
    }
}

impl GenerationParams {
    /// Start from the checkpoint's own sampling defaults.
    ///
    /// Without `do_sample` the model decodes greedily, whatever temperature
    /// it ships.
    pub fn from_generation_config(config: &GenerationConfig) -> Self {
        let defaults = Self::default();
        let temperature = if config.do_sample.unwrap_or(false) {
            config.temperature.unwrap_or(1.0)
        } else {
            0.0
        };
        Self {
            temperature,
            repeat_penalty: config.repeat_penalty.unwrap_or(defaults.repeat_penalty),
            top_p: config.top_p.unwrap_or(defaults.top_p),
            top_k: config.top_k.map(|k| k as usize).unwrap_or(defaults.top_k),
            ..defaults
        }
    }
}
