//! Anthropic Claude provider client
//!
//! Typed-event SSE wire (`message_start`, `content_block_delta`, ...)
//! with `x-api-key` auth and the `anthropic-ratelimit-*` header
//! family.

use async_trait::async_trait;
use openadvisor_types::{GenerateRequest, MessageRole, ProviderKind, Result, ToolSpec};
use serde::Serialize;

use super::{
    body_stream, build_http_client, error_for_status, network_error,
    parse_anthropic_ratelimit_headers, ProviderClient, ProviderStream, WireFamily,
};
use crate::config::ProviderSettings;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = build_http_client(ProviderKind::Anthropic, settings.timeout)?;
        Ok(Self { settings, client })
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

fn convert_tools(tools: &[ToolSpec]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.parameters.clone(),
        })
        .collect()
}

fn convert_messages(request: &GenerateRequest) -> Vec<AnthropicMessage> {
    let mut messages = Vec::with_capacity(request.history.len() + 1);
    for msg in &request.history {
        let role = match msg.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            // system goes in the top-level field, tool results are
            // not replayed
            MessageRole::System | MessageRole::Tool => continue,
        };
        messages.push(AnthropicMessage {
            role,
            content: msg.content.clone(),
        });
    }
    messages.push(AnthropicMessage {
        role: "user",
        content: request.message.clone(),
    });
    messages
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn wire_family(&self) -> WireFamily {
        WireFamily::TypedEvent
    }

    async fn open_stream(&self, request: &GenerateRequest) -> Result<ProviderStream> {
        let body = AnthropicRequest {
            model: self.settings.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system.clone(),
            messages: convert_messages(request),
            tools: request.tools.as_deref().map(convert_tools),
            stream: true,
        };

        let url = format!("{}/v1/messages", self.settings.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error(self.kind(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(self.kind(), status.as_u16(), body));
        }

        let quota = parse_anthropic_ratelimit_headers(response.headers());
        Ok(ProviderStream {
            quota,
            bytes: body_stream(self.kind(), response),
        })
    }
}
