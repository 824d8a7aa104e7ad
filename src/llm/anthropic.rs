use serde::{Deserialize, Serialize};

use super::client::{GenerationDefaults, ProviderReply};
use super::types::{CompletionRequest, Role, TokenUsage};
use super::LlmError;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API backend.
pub struct AnthropicBackend {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl AnthropicBackend {
    pub fn new(api_key: &str, base_url: Option<&str>, timeout_secs: u64) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey("anthropic".into()));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    pub(crate) fn send(
        &self,
        request: &CompletionRequest,
        defaults: &GenerationDefaults,
    ) -> Result<ProviderReply, LlmError> {
        let url = self.endpoint();
        let body = build_body(request, defaults);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| LlmError::from_transport(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), text));
        }
        parse_response(&text)
    }
}

/// Request body for POST /v1/messages
#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Response body from POST /v1/messages
#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: MessagesUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn build_body<'a>(request: &'a CompletionRequest, defaults: &GenerationDefaults) -> MessagesRequest<'a> {
    MessagesRequest {
        model: &request.model,
        max_tokens: request.max_tokens.unwrap_or(defaults.max_tokens),
        temperature: request.temperature.unwrap_or(defaults.temperature),
        system: &request.system,
        messages: request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect(),
    }
}

fn parse_response(body: &str) -> Result<ProviderReply, LlmError> {
    let parsed: MessagesResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ResponseParsing(e.to_string()))?;
    let text: String = parsed
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text.as_str())
        .collect();
    if text.is_empty() {
        return Err(LlmError::ResponseParsing("response has no text content".into()));
    }
    Ok(ProviderReply {
        text,
        usage: TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{Message, Operation};

    #[test]
    fn requires_api_key() {
        let result = AnthropicBackend::new("  ", None, 30);
        assert!(matches!(result, Err(LlmError::MissingApiKey(_))));
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let backend = AnthropicBackend::new("key", Some("http://localhost:8080/"), 30).unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:8080/v1/messages");
    }

    #[test]
    fn body_carries_system_and_turns() {
        let mut request = CompletionRequest::new(Operation::Extract, "claude-3-5-haiku-20241022", "sys", "hi");
        request.messages.push(Message::assistant("{}"));
        let defaults = GenerationDefaults { max_tokens: 512, temperature: 0.0 };

        let json = serde_json::to_value(build_body(&request, &defaults)).unwrap();
        assert_eq!(json["model"], "claude-3-5-haiku-20241022");
        assert_eq!(json["max_tokens"], 512);
        assert_eq!(json["system"], "sys");
        assert_eq!(json["messages"][1]["role"], "assistant");
    }

    #[test]
    fn empty_system_is_omitted() {
        let request = CompletionRequest::new(Operation::Report, "m", "", "hi");
        let defaults = GenerationDefaults { max_tokens: 10, temperature: 0.0 };
        let json = serde_json::to_value(build_body(&request, &defaults)).unwrap();
        assert!(json.get("system").is_none());
    }

    #[test]
    fn parses_text_blocks_and_usage() {
        let body = r#"{
            "id": "msg_1", "type": "message", "role": "assistant",
            "content": [{"type": "text", "text": "{\"category\": \"exercise\"}"}],
            "usage": {"input_tokens": 120, "output_tokens": 30}
        }"#;
        let reply = parse_response(body).unwrap();
        assert_eq!(reply.text, "{\"category\": \"exercise\"}");
        assert_eq!(reply.usage.input_tokens, 120);
        assert_eq!(reply.usage.output_tokens, 30);
    }

    #[test]
    fn rejects_body_without_text() {
        let body = r#"{"content": [], "usage": {"input_tokens": 1, "output_tokens": 0}}"#;
        assert!(matches!(parse_response(body), Err(LlmError::ResponseParsing(_))));
        assert!(matches!(parse_response("not json"), Err(LlmError::ResponseParsing(_))));
    }
}
