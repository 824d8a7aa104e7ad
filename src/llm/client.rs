use std::time::Duration;

use super::anthropic::AnthropicBackend;
use super::openai::OpenAiCompatibleBackend;
use super::retry::RetryPolicy;
use super::types::{Completion, CompletionApi, CompletionRequest, TokenUsage};
use super::usage::{PricingTable, UsageSnapshot, UsageTracker};
use super::LlmError;
use crate::config::{LlmSettings, ProviderKind};

/// Generation parameters applied when a request does not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.0,
        }
    }
}

/// Text and token counts as returned by a backend, before cost accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub text: String,
    pub usage: TokenUsage,
}

/// The supported completion backends, fixed at construction.
pub enum Provider {
    Anthropic(AnthropicBackend),
    OpenAiCompatible(OpenAiCompatibleBackend),
}

impl Provider {
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        let base_url = settings.base_url.as_deref();
        match settings.provider {
            ProviderKind::Anthropic => {
                let key = settings
                    .api_key
                    .as_deref()
                    .ok_or_else(|| LlmError::MissingApiKey("anthropic".into()))?;
                Ok(Provider::Anthropic(AnthropicBackend::new(
                    key,
                    base_url,
                    settings.timeout_secs,
                )?))
            }
            ProviderKind::OpenaiCompatible => Ok(Provider::OpenAiCompatible(
                OpenAiCompatibleBackend::new(settings.api_key.as_deref(), base_url, settings.timeout_secs)?,
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Anthropic(_) => "anthropic",
            Provider::OpenAiCompatible(_) => "openai_compatible",
        }
    }

    fn send(
        &self,
        request: &CompletionRequest,
        defaults: &GenerationDefaults,
    ) -> Result<ProviderReply, LlmError> {
        match self {
            Provider::Anthropic(backend) => backend.send(request, defaults),
            Provider::OpenAiCompatible(backend) => backend.send(request, defaults),
        }
    }
}

/// Provider + retry + usage accounting. The usage counters belong to this
/// instance; share the client by reference (or `Arc`) to share them.
pub struct LlmClient {
    provider: Provider,
    retry: RetryPolicy,
    defaults: GenerationDefaults,
    usage: UsageTracker,
}

impl LlmClient {
    pub fn new(
        provider: Provider,
        retry: RetryPolicy,
        defaults: GenerationDefaults,
        pricing: PricingTable,
    ) -> Self {
        Self {
            provider,
            retry,
            defaults,
            usage: UsageTracker::new(pricing),
        }
    }

    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        let provider = Provider::from_settings(settings)?;
        tracing::info!(provider = provider.name(), "LLM client configured");
        Ok(Self::new(
            provider,
            RetryPolicy::new(
                settings.max_attempts,
                Duration::from_millis(settings.retry_base_delay_ms),
            ),
            GenerationDefaults {
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
            },
            settings.pricing.clone(),
        ))
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    pub fn reset_usage(&self) {
        self.usage.reset();
    }
}

impl CompletionApi for LlmClient {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let _span = tracing::info_span!(
            "llm_complete",
            provider = self.provider.name(),
            model = %request.model,
            operation = request.operation.as_str(),
        )
        .entered();

        match self.retry.run(|_| self.provider.send(request, &self.defaults)) {
            Ok(reply) => {
                let cost_usd = self.usage.record(request.operation, &request.model, &reply.usage);
                tracing::debug!(
                    input_tokens = reply.usage.input_tokens,
                    output_tokens = reply.usage.output_tokens,
                    cost_usd,
                    "LLM call complete"
                );
                Ok(Completion {
                    text: reply.text,
                    model: request.model.clone(),
                    usage: reply.usage,
                    cost_usd,
                })
            }
            Err(e) => {
                self.usage.record_failure();
                tracing::error!(error = %e, "LLM call failed");
                Err(e)
            }
        }
    }
}
