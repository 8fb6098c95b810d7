//! Per-family request bodies and response text extraction.

use serde_json::{json, Map, Value};

use super::{InvocationRequest, ProviderError, ProviderFamily};

pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Families without a system slot get the system text folded into the prompt.
fn folded_prompt(request: &InvocationRequest) -> String {
    match &request.system {
        Some(system) if !system.is_empty() => format!("{}\n\n{}", system, request.prompt),
        _ => request.prompt.clone(),
    }
}

/// Build the exact JSON body a family expects.
pub fn build_request_body(family: ProviderFamily, request: &InvocationRequest) -> Value {
    match family {
        ProviderFamily::Claude => {
            let mut body = Map::new();
            body.insert("anthropic_version".into(), json!(ANTHROPIC_VERSION));
            body.insert("max_tokens".into(), json!(request.max_tokens));
            body.insert("temperature".into(), json!(request.temperature));
            if let Some(top_p) = request.top_p {
                body.insert("top_p".into(), json!(top_p));
            }
            if let Some(system) = &request.system {
                body.insert("system".into(), json!(system));
            }
            body.insert(
                "messages".into(),
                json!([{ "role": "user", "content": request.prompt }]),
            );
            Value::Object(body)
        }
        ProviderFamily::Nova => {
            let mut config = Map::new();
            config.insert("maxTokens".into(), json!(request.max_tokens));
            config.insert("temperature".into(), json!(request.temperature));
            if let Some(top_p) = request.top_p {
                config.insert("topP".into(), json!(top_p));
            }
            let mut body = Map::new();
            body.insert("inferenceConfig".into(), Value::Object(config));
            if let Some(system) = &request.system {
                body.insert("system".into(), json!([{ "text": system }]));
            }
            body.insert(
                "messages".into(),
                json!([{ "role": "user", "content": [{ "text": request.prompt }] }]),
            );
            Value::Object(body)
        }
        ProviderFamily::Titan => {
            let mut config = Map::new();
            config.insert("maxTokenCount".into(), json!(request.max_tokens));
            config.insert("temperature".into(), json!(request.temperature));
            if let Some(top_p) = request.top_p {
                config.insert("topP".into(), json!(top_p));
            }
            json!({
                "inputText": folded_prompt(request),
                "textGenerationConfig": Value::Object(config),
            })
        }
        ProviderFamily::Llama => flat_body(request, "max_gen_len", "top_p"),
        ProviderFamily::Mistral => flat_body(request, "max_tokens", "top_p"),
        ProviderFamily::Cohere => flat_body(request, "max_tokens", "p"),
        ProviderFamily::Ai21 => flat_body(request, "maxTokens", "topP"),
    }
}

fn flat_body(request: &InvocationRequest, max_tokens_key: &str, top_p_key: &str) -> Value {
    let mut body = Map::new();
    body.insert("prompt".into(), json!(folded_prompt(request)));
    body.insert(max_tokens_key.into(), json!(request.max_tokens));
    body.insert("temperature".into(), json!(request.temperature));
    if let Some(top_p) = request.top_p {
        body.insert(top_p_key.into(), json!(top_p));
    }
    Value::Object(body)
}

/// JSON pointer to the generated text for a family.
pub fn response_text_path(family: ProviderFamily) -> &'static str {
    match family {
        ProviderFamily::Claude => "/content/0/text",
        ProviderFamily::Nova => "/output/message/content/0/text",
        ProviderFamily::Titan => "/results/0/outputText",
        ProviderFamily::Llama => "/generation",
        ProviderFamily::Mistral => "/outputs/0/text",
        ProviderFamily::Cohere => "/generations/0/text",
        ProviderFamily::Ai21 => "/completions/0/data/text",
    }
}

/// Read the generated text out of a family's response body.
pub fn extract_text(family: ProviderFamily, body: &Value) -> Result<String, ProviderError> {
    let path = response_text_path(family);
    body.pointer(path)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ProviderError::MissingField { path })
}
