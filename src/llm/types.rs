use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::json::parse_json_block;
use super::LlmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What a call is for. Used to break down usage and cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Extract,
    Classify,
    Report,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Classify => "classify",
            Self::Report => "report",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub operation: Operation,
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    /// Overrides the client default when set.
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(
        operation: Operation,
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            model: model.into(),
            system: system.into(),
            messages: vec![Message::user(user)],
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Text of the last user turn.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}

impl Completion {
    /// Deserialize the JSON payload embedded in the response text.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, LlmError> {
        parse_json_block(&self.text)
    }
}

/// The completion seam every caller depends on.
pub trait CompletionApi: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn completion_json_reads_fenced_payload() {
        let completion = Completion {
            text: "```json\n{\"intent\": \"COUNT\"}\n```".into(),
            model: "m".into(),
            usage: TokenUsage::default(),
            cost_usd: 0.0,
        };
        let value: Value = completion.json().unwrap();
        assert_eq!(value["intent"], "COUNT");
    }

    #[test]
    fn last_user_message_skips_assistant_turns() {
        let mut request = CompletionRequest::new(Operation::Extract, "m", "sys", "first");
        request.messages.push(Message::assistant("reply"));
        request.messages.push(Message::user("second"));
        assert_eq!(request.last_user_message(), Some("second"));
    }
}
