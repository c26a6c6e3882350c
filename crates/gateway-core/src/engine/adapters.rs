//! Outbound chat-completion adapter interface (§6 "Outbound").
//!
//! The specific wire format of upstream model APIs is explicitly out of
//! scope, but a complete core still needs a concrete adapter to dispatch
//! through end-to-end. `HttpChatAdapter` is a generic OpenAI-compatible JSON
//! adapter grounded on `engine::providers::openai::OpenAiProvider`'s
//! request/retry shape (stripped of streaming and tool-calling, both out of
//! the dispatch core's scope); `LocalChatAdapter` is the same shape pointed
//! at a locally-configured base URL, grounded on
//! `ProviderKind::Ollama`'s `default_base_url()`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::atoms::error::UpstreamError;
use crate::atoms::types::{AdapterReply, SessionMessage, TargetId, TierConfig};

/// `call(target, messages, maxOutputTokens) -> {text, inputTokens,
/// outputTokens} | error-kind` (§6).
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    async fn call(
        &self,
        target: &TargetId,
        tier: &TierConfig,
        messages: &[SessionMessage],
        max_output_tokens: u32,
    ) -> Result<AdapterReply, UpstreamError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

fn role_str(role: crate::atoms::types::Role) -> &'static str {
    match role {
        crate::atoms::types::Role::User => "user",
        crate::atoms::types::Role::Assistant => "assistant",
        crate::atoms::types::Role::System => "system",
    }
}

/// One adapter for the cloud tiers (economy/standard/premium), each
/// configured with its own endpoint and bearer key via `TierConfig`.
pub struct HttpChatAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpChatAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, api_key }
    }
}

#[async_trait]
impl ChatAdapter for HttpChatAdapter {
    async fn call(
        &self,
        _target: &TargetId,
        tier: &TierConfig,
        messages: &[SessionMessage],
        max_output_tokens: u32,
    ) -> Result<AdapterReply, UpstreamError> {
        let body = ChatCompletionRequest {
            model: &tier.model_name,
            messages: messages.iter().map(|m| WireMessage { role: role_str(m.role), content: &m.content }).collect(),
            max_tokens: max_output_tokens,
        };

        let mut req = self
            .client
            .post(&tier.endpoint)
            .timeout(std::time::Duration::from_secs(tier.timeout_s))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| UpstreamError::transient(e.to_string()))?;
        let status = response.status().as_u16();

        if status == 401 || status == 403 {
            return Err(UpstreamError::auth(format!("upstream returned {status}")));
        }
        if status == 429 {
            let retry_after_s = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(crate::engine::retry::parse_retry_after);
            return Err(UpstreamError::rate_limit("rate limited by upstream", retry_after_s));
        }
        if crate::engine::retry::is_retryable_status(status) {
            return Err(UpstreamError::transient(format!("upstream returned {status}")));
        }
        if !response.status().is_success() {
            return Err(UpstreamError::permanent(format!("upstream returned {status}")));
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| UpstreamError::permanent(format!("invalid response body: {e}")))?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| UpstreamError::permanent("empty choices"))?;
        let usage = parsed.usage.unwrap_or(Usage { prompt_tokens: 0, completion_tokens: 0 });

        Ok(AdapterReply {
            text: choice.message.content,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}

/// Same wire shape as [`HttpChatAdapter`], pointed at a locally-configured
/// base URL (the `local` tier) with no bearer auth.
pub struct LocalChatAdapter {
    inner: HttpChatAdapter,
}

impl LocalChatAdapter {
    pub fn new() -> Self {
        Self { inner: HttpChatAdapter::new(None) }
    }
}

impl Default for LocalChatAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatAdapter for LocalChatAdapter {
    async fn call(
        &self,
        target: &TargetId,
        tier: &TierConfig,
        messages: &[SessionMessage],
        max_output_tokens: u32,
    ) -> Result<AdapterReply, UpstreamError> {
        self.inner.call(target, tier, messages, max_output_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_str_maps_all_variants() {
        assert_eq!(role_str(crate::atoms::types::Role::User), "user");
        assert_eq!(role_str(crate::atoms::types::Role::Assistant), "assistant");
        assert_eq!(role_str(crate::atoms::types::Role::System), "system");
    }
}
