//! Perplexity provider client
//!
//! The real-time-data provider: Sonar models answer with live web
//! grounding, which is why market_data queries land here first.
//! OpenAI-shaped wire, but no tool calling - tool definitions are
//! dropped rather than forwarded.

use async_trait::async_trait;
use openadvisor_types::{GenerateRequest, ProviderKind, Result};
use tracing::debug;

use super::openai_wire::{chat_messages, post_chat_stream, ChatRequest};
use super::{build_http_client, ProviderClient, ProviderStream, WireFamily};
use crate::config::ProviderSettings;

pub struct PerplexityClient {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl PerplexityClient {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = build_http_client(ProviderKind::Perplexity, settings.timeout)?;
        Ok(Self { settings, client })
    }
}

#[async_trait]
impl ProviderClient for PerplexityClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Perplexity
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn wire_family(&self) -> WireFamily {
        WireFamily::DeltaObject
    }

    async fn open_stream(&self, request: &GenerateRequest) -> Result<ProviderStream> {
        if request.tools.is_some() {
            debug!("perplexity does not support tool calling, dropping tool definitions");
        }
        let body = ChatRequest {
            model: self.settings.model.clone(),
            messages: chat_messages(request),
            max_tokens: request.max_tokens,
            tools: None,
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
