use serde::{Deserialize, Serialize};

use super::client::{GenerationDefaults, ProviderReply};
use super::types::{CompletionRequest, Role, TokenUsage};
use super::LlmError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenAiCompatibleBackend {
    /// The key is optional: self-hosted compatible servers often run without one.
    pub fn new(
        api_key: Option<&str>,
        base_url: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()).map(str::to_string),
            client,
            timeout_secs,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub(crate) fn send(
        &self,
        request: &CompletionRequest,
        defaults: &GenerationDefaults,
    ) -> Result<ProviderReply, LlmError> {
        let url = self.endpoint();
        let body = build_body(request, defaults);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
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

/// Request body for POST /chat/completions
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Response body from POST /chat/completions
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn build_body<'a>(request: &'a CompletionRequest, defaults: &GenerationDefaults) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: &request.system,
        });
    }
    messages.extend(request.messages.iter().map(|m| ChatMessage {
        role: match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        },
        content: &m.content,
    }));

    ChatRequest {
        model: &request.model,
        max_tokens: request.max_tokens.unwrap_or(defaults.max_tokens),
        temperature: request.temperature.unwrap_or(defaults.temperature),
        messages,
    }
}

fn parse_response(body: &str) -> Result<ProviderReply, LlmError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ResponseParsing(e.to_string()))?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| LlmError::ResponseParsing("response has no message content".into()))?;
    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();
    Ok(ProviderReply { text, usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Operation;

    #[test]
    fn default_endpoint() {
        let backend = OpenAiCompatibleBackend::new(Some("sk-test"), None, 30).unwrap();
        assert_eq!(backend.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn blank_key_is_dropped() {
        let backend = OpenAiCompatibleBackend::new(Some(""), Some("http://localhost:1234/v1"), 30).unwrap();
        assert!(backend.api_key.is_none());
    }

    #[test]
    fn system_prompt_becomes_first_message() {
        let request = CompletionRequest::new(Operation::Classify, "gpt-4o-mini", "classify", "how many runs?");
        let defaults = GenerationDefaults { max_tokens: 256, temperature: 0.0 };
        let json = serde_json::to_value(build_body(&request, &defaults)).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "classify");
        assert_eq!(json["messages"][1]["role"], "user");
    }

    #[test]
    fn parses_choice_and_usage() {
        let body = r#"{
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 11, "completion_tokens": 2, "total_tokens": 13}
        }"#;
        let reply = parse_response(body).unwrap();
        assert_eq!(reply.text, "hello");
        assert_eq!(reply.usage.total(), 13);
    }

    #[test]
    fn missing_usage_defaults_to_zero() {
        let body = r#"{"choices": [{"message": {"content": "ok"}}]}"#;
        assert_eq!(parse_response(body).unwrap().usage, TokenUsage::default());
    }

    #[test]
    fn empty_choices_is_parse_error() {
        assert!(matches!(parse_response(r#"{"choices": []}"#), Err(LlmError::ResponseParsing(_))));
    }
}
