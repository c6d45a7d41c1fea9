//! Wire types shared by the OpenAI-shaped providers
//!
//! OpenAI, Groq, Perplexity, and DeepSeek all speak the
//! `/chat/completions` envelope with bearer auth and `x-ratelimit-*`
//! headers; they differ in endpoint, models, tool support, and
//! quota defaults.

use openadvisor_types::{GenerateRequest, MessageRole, ProviderKind, Result, ToolSpec};
use serde::Serialize;

use super::{body_stream, error_for_status, network_error, parse_openai_ratelimit_headers,
    ProviderStream};

#[derive(Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    pub stream: bool,
}

#[derive(Serialize)]
pub(crate) struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Serialize)]
pub(crate) struct ChatTool {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: ChatFunction,
}

#[derive(Serialize)]
pub(crate) struct ChatFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// System prompt first, then history, then the latest user message
pub(crate) fn chat_messages(request: &GenerateRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    if let Some(system) = &request.system {
        messages.push(ChatMessage {
            role: "system",
            content: system.clone(),
        });
    }
    for msg in &request.history {
        messages.push(ChatMessage {
            role: match msg.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            },
            content: msg.content.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: request.message.clone(),
    });
    messages
}

pub(crate) fn chat_tools(tools: &[ToolSpec]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|t| ChatTool {
            tool_type: "function",
            function: ChatFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

/// POST the chat request and open the stream, mapping errors and
/// parsing the `x-ratelimit-*` quota headers
pub(crate) async fn post_chat_stream(
    kind: ProviderKind,
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    body: &ChatRequest,
) -> Result<ProviderStream> {
    let url = format!("{base_url}/chat/completions");
    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| network_error(kind, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(error_for_status(kind, status.as_u16(), body));
    }

    let quota = parse_openai_ratelimit_headers(response.headers());
    Ok(ProviderStream {
        quota,
        bytes: body_stream(kind, response),
    })
}
