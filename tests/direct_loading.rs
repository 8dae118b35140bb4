// Integration tests for the tokenizer/model path.

use sbk_model_tester::runners::new_tokens;
use sbk_model_tester::{
    AutoModelForCausalLM, AutoTokenizer, ChatTemplateOptions, DeviceMap, GenerateOptions, Message,
    ModelError, Precision,
};

const MODEL_ID: &str = "meta-llama/Llama-3.2-3B-Instruct";

#[tokio::test]
async fn invalid_model_id_is_rejected_offline() {
    let err = AutoTokenizer::from_pretrained("owner/name/extra")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ModelError>(),
        Some(ModelError::InvalidModelId(_))
    ));

    let err = AutoModelForCausalLM::from_pretrained("", Precision::BF16, DeviceMap::Cpu)
        .await
        .err()
        .expect("empty id must fail");
    assert!(err.to_string().contains("invalid model identifier"));
}

#[tokio::test]
#[ignore = "downloads a gated checkpoint"]
async fn decodes_only_new_tokens() -> anyhow::Result<()> {
    let tokenizer = AutoTokenizer::from_pretrained(MODEL_ID).await?;
    let model =
        AutoModelForCausalLM::from_pretrained(MODEL_ID, Precision::BF16, DeviceMap::Auto).await?;

    let inputs = tokenizer.apply_chat_template(
        &[Message::user("Who are you?")],
        ChatTemplateOptions {
            add_generation_prompt: true,
        },
        model.device(),
    )?;
    let prompt_len = inputs.input_ids.dim(1)?;
    let outputs = model.generate(&inputs, GenerateOptions { max_new_tokens: 16 })?;
    assert!(outputs.dim(1)? > prompt_len);

    let response = tokenizer.decode(&new_tokens(&outputs, prompt_len)?, true)?;
    assert!(!response.trim().is_empty());
    assert!(!response.contains("Who are you?"));
    assert!(!response.contains("<|"));
    Ok(())
}
