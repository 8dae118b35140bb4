//! Hugging Face Hub loaders for every file a causal-LM checkpoint ships.
//!
//! - [`HfLoader`] - fetches a single file into the local hub cache, with retry
//! - [`TokenizerLoader`] - `tokenizer.json`
//! - [`TokenizerConfigLoader`] - `tokenizer_config.json` (chat template, bos/eos)
//! - [`GenerationConfigLoader`] - `generation_config.json`
//! - [`ConfigLoader`] - any serde-deserializable JSON file, e.g. `config.json`
//! - [`SafetensorsLoader`] - sharded or single-file safetensors weights
//!
//! Gated repositories need a token written by `hf auth login`; the hub client
//! picks it up from its cache directory.

use crate::core::{GenerationConfig, ModelError};
use anyhow::Context as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokenizers::Tokenizer;

const MAX_RETRIES: u32 = 3;

/// Reject identifiers the hub could never resolve, before touching the network.
pub fn validate_model_id(model_id: &str) -> Result<(), ModelError> {
    let invalid = || ModelError::InvalidModelId(model_id.to_string());

    let segments: Vec<&str> = model_id.split('/').collect();
    if segments.len() > 2 {
        return Err(invalid());
    }
    for segment in segments {
        let allowed = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if segment.is_empty() || !allowed || segment.contains("..") {
            return Err(invalid());
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HfLoader {
    pub repo: String,
    pub filename: String,
}

impl HfLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            repo: repo.into(),
            filename: filename.into(),
        }
    }

    pub async fn load(&self) -> anyhow::Result<PathBuf> {
        validate_model_id(&self.repo)?;

        let hf_api = hf_hub::api::tokio::ApiBuilder::new()
            .with_chunk_size(None)
            .build()?;
        let hf_api = hf_api.model(self.repo.clone());

        let mut attempt = 0;
        loop {
            tracing::debug!(repo = %self.repo, file = %self.filename, attempt, "fetching from hub");
            match hf_api.get(self.filename.as_str()).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    // Concurrent downloads of the same blob contend on a file lock.
                    let retryable = e.to_string().contains("Lock acquisition failed");
                    if retryable && attempt + 1 < MAX_RETRIES {
                        let wait_time = std::time::Duration::from_millis(100 * (1 << attempt));
                        tracing::warn!(file = %self.filename, ?wait_time, "hub lock busy, retrying");
                        tokio::time::sleep(wait_time).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(anyhow::Error::from(e)
                        .context(format!("failed to fetch {}/{}", self.repo, self.filename)));
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct TokenizerLoader {
    pub tokenizer_file_loader: HfLoader,
}

impl TokenizerLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            tokenizer_file_loader: HfLoader::new(repo, filename),
        }
    }

    pub async fn load(&self) -> anyhow::Result<Tokenizer> {
        let tokenizer_file_path = self.tokenizer_file_loader.load().await?;

        let tokenizer =
            tokenizers::Tokenizer::from_file(tokenizer_file_path).map_err(anyhow::Error::msg)?;

        Ok(tokenizer)
    }
}

/// Fetches a JSON file and deserializes it into `T`.
pub struct ConfigLoader {
    pub config_file_loader: HfLoader,
}

impl ConfigLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            config_file_loader: HfLoader::new(repo, filename),
        }
    }

    pub async fn load<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let path = self.config_file_loader.load().await?;
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("malformed {}", self.config_file_loader.filename))
    }
}

pub struct GenerationConfigLoader {
    pub generation_config_file_loader: HfLoader,
}

#[derive(Deserialize)]
struct RawGenerationConfig {
    do_sample: Option<bool>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    top_k: Option<u64>,
    #[serde(alias = "repetition_penalty")]
    repeat_penalty: Option<f32>,
    #[serde(alias = "eos_token_ids")]
    eos_token_id: Option<serde_json::Value>,
}

impl GenerationConfigLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            generation_config_file_loader: HfLoader::new(repo, filename),
        }
    }

    pub async fn load(&self) -> anyhow::Result<GenerationConfig> {
        let path = self.generation_config_file_loader.load().await?;
        parse_generation_config(&std::fs::read_to_string(path)?)
    }
}

/// Parse `generation_config.json`, where `eos_token_id` may be a number or a list.
pub fn parse_generation_config(content: &str) -> anyhow::Result<GenerationConfig> {
    let raw: RawGenerationConfig = serde_json::from_str(content)?;

    Ok(GenerationConfig {
        do_sample: raw.do_sample,
        temperature: raw.temperature,
        top_p: raw.top_p,
        top_k: raw.top_k,
        repeat_penalty: raw.repeat_penalty,
        eos_token_ids: token_ids(raw.eos_token_id)?,
    })
}

pub(crate) fn token_ids(value: Option<serde_json::Value>) -> anyhow::Result<Vec<u32>> {
    let as_id = |v: &serde_json::Value| {
        v.as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| anyhow::anyhow!("invalid token id {v}"))
    };
    match value {
        Some(serde_json::Value::Array(arr)) => arr.iter().map(as_id).collect(),
        Some(serde_json::Value::Null) | None => Ok(Vec::new()),
        Some(v) => Ok(vec![as_id(&v)?]),
    }
}

/// The parts of `tokenizer_config.json` needed to format conversations.
#[derive(Debug, Clone, Default)]
pub struct TokenizerConfig {
    pub chat_template: Option<String>,
    pub bos_token: Option<String>,
    pub eos_token: Option<String>,
}

#[derive(Deserialize)]
struct RawTokenizerConfig {
    chat_template: Option<serde_json::Value>,
    bos_token: Option<serde_json::Value>,
    eos_token: Option<serde_json::Value>,
}

/// Parse `tokenizer_config.json`.
///
/// Special tokens may be plain strings or `AddedToken` objects; the chat
/// template may be a string or a list of named templates, of which `default`
/// is taken.
pub fn parse_tokenizer_config(content: &str) -> anyhow::Result<TokenizerConfig> {
    let raw: RawTokenizerConfig = serde_json::from_str(content)?;

    let token_content = |v: Option<serde_json::Value>| match v {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Object(obj)) => obj
            .get("content")
            .and_then(|c| c.as_str())
            .map(str::to_string),
        _ => None,
    };

    let chat_template = match raw.chat_template {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Array(templates)) => templates
            .iter()
            .find(|t| t.get("name").and_then(|n| n.as_str()) == Some("default"))
            .and_then(|t| t.get("template"))
            .and_then(|t| t.as_str())
            .map(str::to_string),
        _ => None,
    };

    Ok(TokenizerConfig {
        chat_template,
        bos_token: token_content(raw.bos_token),
        eos_token: token_content(raw.eos_token),
    })
}

pub struct TokenizerConfigLoader {
    pub tokenizer_config_file_loader: HfLoader,
}

impl TokenizerConfigLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            tokenizer_config_file_loader: HfLoader::new(repo, filename),
        }
    }

    pub async fn load(&self) -> anyhow::Result<TokenizerConfig> {
        let path = self.tokenizer_config_file_loader.load().await?;
        parse_tokenizer_config(&std::fs::read_to_string(path)?)
    }
}

#[derive(Deserialize)]
struct SafetensorsIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// Resolves the weight files of a checkpoint, downloading each shard.
pub struct SafetensorsLoader {
    pub repo: String,
}

impl SafetensorsLoader {
    pub fn new(repo: &str) -> Self {
        Self { repo: repo.into() }
    }

    pub async fn load(&self) -> anyhow::Result<Vec<PathBuf>> {
        match HfLoader::new(&self.repo, "model.safetensors.index.json")
            .load()
            .await
        {
            Ok(index_path) => {
                let index: SafetensorsIndex =
                    serde_json::from_str(&std::fs::read_to_string(index_path)?)?;
                let shards: BTreeSet<String> = index.weight_map.into_values().collect();

                let mut paths = Vec::with_capacity(shards.len());
                for shard in shards {
                    tracing::info!(repo = %self.repo, %shard, "loading weight shard");
                    paths.push(HfLoader::new(&self.repo, &shard).load().await?);
                }
                Ok(paths)
            }
            Err(index_err) => {
                tracing::debug!(error = %index_err, "no sharded index, trying single file");
                let path = HfLoader::new(&self.repo, "model.safetensors")
                    .load()
                    .await
                    .with_context(|| ModelError::MissingWeights(self.repo.clone()))?;
                Ok(vec![path])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_model_id() {
        assert!(validate_model_id("meta-llama/Llama-3.2-3B-Instruct").is_ok());
        assert!(validate_model_id("gpt2").is_ok());

        for bad in ["", "a/b/c", "/name", "owner/", "has space/model", "a/..", "not a model id!"] {
            assert!(
                matches!(validate_model_id(bad), Err(ModelError::InvalidModelId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_id_fails_before_network() {
        let err = HfLoader::new("definitely not/a valid/model", "config.json")
            .load()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid model identifier"));
    }

    #[test]
    fn test_generation_config_eos_list() {
        let config = parse_generation_config(
            r#"{
                "bos_token_id": 128000,
                "do_sample": true,
                "eos_token_id": [128001, 128008, 128009],
                "temperature": 0.6,
                "top_p": 0.9,
                "transformers_version": "4.45.0.dev0"
            }"#,
        )
        .unwrap();

        assert_eq!(config.eos_token_ids, vec![128001, 128008, 128009]);
        assert_eq!(config.do_sample, Some(true));
        assert_eq!(config.temperature, Some(0.6));
        assert_eq!(config.top_p, Some(0.9));
        assert_eq!(config.top_k, None);
    }

    #[test]
    fn test_generation_config_single_eos() {
        let config =
            parse_generation_config(r#"{"eos_token_id": 2, "repetition_penalty": 1.1}"#).unwrap();
        assert_eq!(config.eos_token_ids, vec![2]);
        assert_eq!(config.repeat_penalty, Some(1.1));
    }

    #[test]
    fn test_tokenizer_config_token_forms() {
        let config = parse_tokenizer_config(
            r#"{
                "bos_token": "<|begin_of_text|>",
                "eos_token": {"content": "<|eot_id|>", "lstrip": false, "special": true},
                "chat_template": "{{ bos_token }}"
            }"#,
        )
        .unwrap();

        assert_eq!(config.bos_token.as_deref(), Some("<|begin_of_text|>"));
        assert_eq!(config.eos_token.as_deref(), Some("<|eot_id|>"));
        assert_eq!(config.chat_template.as_deref(), Some("{{ bos_token }}"));
    }

    #[test]
    fn test_tokenizer_config_named_templates() {
        let config = parse_tokenizer_config(
            r#"{
                "chat_template": [
                    {"name": "tool_use", "template": "tools"},
                    {"name": "default", "template": "chat"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.chat_template.as_deref(), Some("chat"));
        assert_eq!(config.bos_token, None);
    }
}
