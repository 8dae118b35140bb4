//! Offline fixtures: a word-level tokenizer with Llama 3 special tokens and a
//! tiny zero-weight Llama sharing its 16-token vocabulary.

use crate::auto::AutoTokenizer;
use crate::core::{GenerationConfig, Precision};
use crate::pipelines::utils::DeviceMap;
use crate::models::chat_template::ChatTemplate;
use crate::models::implementations::llama::{LlamaConfig, LlamaModel};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use tokenizers::Tokenizer;

pub(crate) const LLAMA3_TEMPLATE: &str = "{{- bos_token }}{% for message in messages %}{{ '<|start_header_id|>' + message['role'] + '<|end_header_id|>\n\n' + message['content'] | trim + '<|eot_id|>' }}{% endfor %}{% if add_generation_prompt %}{{ '<|start_header_id|>assistant<|end_header_id|>\n\n' }}{% endif %}";

/// Abridged Llama 3.2 instruct template: dated system header, optional
/// leading system message and tool branches.
pub(crate) const LLAMA32_TEMPLATE: &str = r#"{{- bos_token }}
{%- if custom_tools is defined %}
    {%- set tools = custom_tools %}
{%- endif %}
{%- if not tools_in_user_message is defined %}
    {%- set tools_in_user_message = true %}
{%- endif %}
{%- if not date_string is defined %}
    {%- if strftime_now is defined %}
        {%- set date_string = strftime_now("%d %b %Y") %}
    {%- else %}
        {%- set date_string = "26 Jul 2024" %}
    {%- endif %}
{%- endif %}
{%- if not tools is defined %}
    {%- set tools = none %}
{%- endif %}
{%- if messages[0]['role'] == 'system' %}
    {%- set system_message = messages[0]['content']|trim %}
    {%- set messages = messages[1:] %}
{%- else %}
    {%- set system_message = "" %}
{%- endif %}
{{- "<|start_header_id|>system<|end_header_id|>\n\n" }}
{%- if tools is not none %}
    {{- "Environment: ipython\n" }}
{%- endif %}
{{- "Cutting Knowledge Date: December 2023\n" }}
{{- "Today Date: " + date_string + "\n\n" }}
{%- if tools is not none and not tools_in_user_message %}
    {{- "You have access to the following functions.\n\n" }}
    {%- for t in tools %}
        {{- t | tojson(indent=4) }}
        {{- "\n\n" }}
    {%- endfor %}
{%- endif %}
{{- system_message }}
{{- "<|eot_id|>" }}
{%- if tools_in_user_message and not tools is none %}
    {%- if messages | length != 0 %}
        {%- set first_user_message = messages[0]['content']|trim %}
        {%- set messages = messages[1:] %}
    {%- else %}
        {{- raise_exception("Cannot put tools in the first user message when there's no first user message!") }}
    {%- endif %}
    {{- '<|start_header_id|>user<|end_header_id|>\n\n' -}}
    {%- for t in tools %}
        {{- t | tojson(indent=4) }}
        {{- "\n\n" }}
    {%- endfor %}
    {{- first_user_message + "<|eot_id|>"}}
{%- endif %}
{%- for message in messages %}
    {%- if not (message.role == 'ipython' or message.role == 'tool' or 'tool_calls' in message) %}
        {{- '<|start_header_id|>' + message['role'] + '<|end_header_id|>\n\n'+ message['content'] | trim + '<|eot_id|>' }}
    {%- elif 'tool_calls' in message %}
        {%- set tool_call = message.tool_calls[0].function %}
        {{- '<|start_header_id|>assistant<|end_header_id|>\n\n' -}}
        {{- '{"name": "' + tool_call.name + '", ' }}
        {{- '"parameters": ' }}
        {{- tool_call.arguments | tojson }}
        {{- "}" }}
        {{- "<|eot_id|>" }}
    {%- elif message.role == "tool" or message.role == "ipython" %}
        {{- "<|start_header_id|>ipython<|end_header_id|>\n\n" }}
        {{- message.content | tojson }}
        {{- "<|eot_id|>" }}
    {%- endif %}
{%- endfor %}
{%- if add_generation_prompt %}
    {{- '<|start_header_id|>assistant<|end_header_id|>\n\n' }}
{%- endif %}"#;

const TOKENIZER_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [
    {"id": 11, "content": "<|begin_of_text|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 12, "content": "<|start_header_id|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 13, "content": "<|end_header_id|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 14, "content": "<|eot_id|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
    {"id": 15, "content": "<|end_of_text|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
  ],
  "normalizer": null,
  "pre_tokenizer": {"type": "Whitespace"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {
      "hello": 0, "<unk>": 1, "user": 2, "assistant": 3, "system": 4,
      "Who": 5, "are": 6, "you": 7, "?": 8, "I": 9, "am": 10,
      "<|begin_of_text|>": 11, "<|start_header_id|>": 12, "<|end_header_id|>": 13,
      "<|eot_id|>": 14, "<|end_of_text|>": 15
    },
    "unk_token": "<unk>"
  }
}"#;

pub(crate) fn tiny_tokenizer() -> AutoTokenizer {
    let tokenizer = Tokenizer::from_bytes(TOKENIZER_JSON.as_bytes()).unwrap();
    let chat_template = ChatTemplate::new(LLAMA3_TEMPLATE, "<|begin_of_text|>", "<|eot_id|>").unwrap();
    AutoTokenizer::from_parts(tokenizer, chat_template)
}

pub(crate) fn tiny_config() -> LlamaConfig {
    serde_json::from_str(
        r#"{
            "architectures": ["LlamaForCausalLM"],
            "hidden_size": 8,
            "intermediate_size": 16,
            "num_attention_heads": 2,
            "num_hidden_layers": 2,
            "num_key_value_heads": 1,
            "rms_norm_eps": 1e-5,
            "vocab_size": 16,
            "max_position_embeddings": 64,
            "tie_word_embeddings": true,
            "eos_token_id": 15
        }"#,
    )
    .unwrap()
}

/// Every logit is zero, so greedy decoding always yields id 0 (`hello`).
pub(crate) fn tiny_llama_with(generation_config: GenerationConfig) -> LlamaModel {
    LlamaModel::new(
        tiny_config(),
        generation_config,
        VarBuilder::zeros(DType::F32, &Device::Cpu),
    )
    .unwrap()
}

/// Tiny model loaded the way a checkpoint would be for `precision` on `device_map`.
pub(crate) fn tiny_llama_on(precision: Precision, device_map: DeviceMap) -> LlamaModel {
    let device = device_map.resolve().unwrap();
    let dtype = precision.dtype_on(&device);
    LlamaModel::new(
        tiny_config(),
        GenerationConfig::default(),
        VarBuilder::zeros(dtype, &device),
    )
    .unwrap()
}

pub(crate) fn tiny_llama() -> LlamaModel {
    tiny_llama_with(GenerationConfig::default())
}
