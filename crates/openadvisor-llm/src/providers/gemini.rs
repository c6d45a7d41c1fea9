//! Google Gemini provider client
//!
//! SSE stream of candidate objects (`candidates[].content.parts[]`).
//! Auth travels as a query parameter rather than a header, and Gemini
//! reports no rate-limit headers at all - quota falls back to the
//! built-in conservative limits.

use async_trait::async_trait;
use openadvisor_types::{GenerateRequest, MessageRole, ProviderKind, Result};
use serde::Serialize;
use tracing::debug;

use super::{
    body_stream, build_http_client, error_for_status, network_error, ProviderClient,
    ProviderStream, WireFamily,
};
use crate::config::ProviderSettings;
use crate::quota::QuotaSnapshot;

pub struct GeminiClient {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = build_http_client(ProviderKind::Gemini, settings.timeout)?;
        Ok(Self { settings, client })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}


#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

fn text_content(role: Option<&'static str>, text: impl Into<String>) -> GeminiContent {
    GeminiContent {
        role,
        parts: vec![GeminiPart { text: text.into() }],
    }
}

fn convert_contents(request: &GenerateRequest) -> Vec<GeminiContent> {
    let mut contents = Vec::with_capacity(request.history.len() + 1);
    for msg in &request.history {
        let role = match msg.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "model",
            MessageRole::System | MessageRole::Tool => continue,
        };
        contents.push(text_content(Some(role), msg.content.clone()));
    }
    contents.push(text_content(Some("user"), request.message.clone()));
    contents
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn wire_family(&self) -> WireFamily {
        WireFamily::CandidateObject
    }

    async fn open_stream(&self, request: &GenerateRequest) -> Result<ProviderStream> {
        if request.tools.is_some() {
            debug!("tool definitions are not forwarded to gemini");
        }
        let body = GeminiRequest {
            system_instruction: request
                .system
                .as_ref()
                .map(|s| text_content(None, s.clone())),
            contents: convert_contents(request),
            generation_config: request
                .max_tokens
                .map(|max_output_tokens| GenerationConfig { max_output_tokens }),
        };

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.settings.base_url, self.settings.model
        );
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.settings.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error(self.kind(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(self.kind(), status.as_u16(), body));
        }

        // no rate-limit headers; local conservative limits stand
        Ok(ProviderStream {
            quota: QuotaSnapshot::default(),
            bytes: body_stream(self.kind(), response),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openadvisor_types::Message;

    #[test]
    fn test_assistant_history_maps_to_model_role() {
        let request = GenerateRequest::new("next")
            .with_history(vec![Message::user("q"), Message::assistant("a")]);
        let contents = convert_contents(&request);
        let roles: Vec<_> = contents.iter().map(|c| c.role).collect();
        assert_eq!(roles, vec![Some("user"), Some("model"), Some("user")]);
    }

    #[test]
    fn test_system_instruction_has_no_role() {
        let request = GenerateRequest::new("hi").with_system("advisor persona");
        let body = GeminiRequest {
            system_instruction: request
                .system
                .as_ref()
                .map(|s| text_content(None, s.clone())),
            contents: convert_contents(&request),
            generation_config: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "advisor persona");
    }
}
