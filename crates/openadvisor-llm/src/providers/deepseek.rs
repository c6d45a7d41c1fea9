//! DeepSeek provider client
//!
//! Cheapest per token; the free-tier downgrade target. OpenAI-shaped
//! wire.

use async_trait::async_trait;
use openadvisor_types::{GenerateRequest, ProviderKind, Result};

use super::openai_wire::{chat_messages, chat_tools, post_chat_stream, ChatRequest};
use super::{build_http_client, ProviderClient, ProviderStream, WireFamily};
use crate::config::ProviderSettings;

pub struct DeepSeekClient {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl DeepSeekClient {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = build_http_client(ProviderKind::DeepSeek, settings.timeout)?;
        Ok(Self { settings, client })
    }

    /// Whether the configured model emits reasoning tokens
    pub fn is_reasoner(&self) -> bool {
        self.settings.model.contains("reasoner")
    }
}

#[async_trait]
impl ProviderClient for DeepSeekClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn wire_family(&self) -> WireFamily {
        WireFamily::DeltaObject
    }

    async fn open_stream(&self, request: &GenerateRequest) -> Result<ProviderStream> {
        let body = ChatRequest {
            model: self.settings.model.clone(),
            messages: chat_messages(request),
            max_tokens: request.max_tokens,
            tools: request.tools.as_deref().map(chat_tools),
            stream: true,
        };
        post_chat_stream(
            self.kind(),
            &self.client,
            &self.settings.base_url,
            &self.settings.api_key,
            &body,
        )
        .await
    }
}
