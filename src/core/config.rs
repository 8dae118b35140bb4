use candle_core::{DType, Device};

/// Sampling defaults shipped with a checkpoint in `generation_config.json`.
#[derive(Debug, Clone, Default)]
pub struct GenerationConfig {
    pub do_sample: Option<bool>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u64>,
    pub repeat_penalty: Option<f32>,
    pub eos_token_ids: Vec<u32>,
}

/// Numeric precision the weights are materialized in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    F32,
    F16,
    #[default]
    BF16,
}

impl Precision {
    pub fn dtype(&self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
            Precision::BF16 => DType::BF16,
        }
    }

    /// The dtype weights are loaded in on `device`. Candle's CPU matmul has no
    /// half-precision kernels, so CPU always loads in f32.
    pub fn dtype_on(&self, device: &Device) -> DType {
        if device.is_cpu() && *self != Precision::F32 {
            tracing::warn!(precision = %self, "half precision is not supported on CPU, loading in float32");
            return DType::F32;
        }
        self.dtype()
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Precision::F32 => "float32",
            Precision::F16 => "float16",
            Precision::BF16 => "bfloat16",
        };
        write!(f, "{name}")
    }
}
