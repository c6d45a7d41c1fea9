//! Provider clients
//!
//! One client per inference provider. Each knows its native request
//! envelope, auth header shape, rate-limit response headers, and how
//! to open an incremental response channel. The wire family tells the
//! transcoder which decoder to apply to the returned byte stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use openadvisor_types::{GatewayError, GenerateRequest, ProviderKind, Result};
use reqwest::header::HeaderMap;

use crate::quota::QuotaSnapshot;

mod anthropic;
mod deepseek;
mod gemini;
mod groq;
mod openai;
mod openai_wire;
mod perplexity;

pub use anthropic::AnthropicClient;
pub use deepseek::DeepSeekClient;
pub use gemini::GeminiClient;
pub use groq::GroqClient;
pub use openai::OpenAiClient;
pub use perplexity::PerplexityClient;

/// Raw provider bytes, error-mapped into the gateway taxonomy
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Which incremental encoding a provider speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFamily {
    /// One JSON object per chunk with a role/content delta
    /// (OpenAI-shaped)
    DeltaObject,
    /// Typed events: message_start, content_block_delta, ...
    /// (Anthropic)
    TypedEvent,
    /// Candidate objects with content parts (Gemini)
    CandidateObject,
}

/// An open provider response: quota parsed from the response headers
/// plus the streaming body
pub struct ProviderStream {
    pub quota: QuotaSnapshot,
    pub bytes: ByteStream,
}

/// Capability interface all providers implement
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;
    /// Model identifier sent to the provider
    fn model(&self) -> &str;
    fn wire_family(&self) -> WireFamily;

    /// Build the provider-native request and open the incremental
    /// response channel. Fails before any bytes are produced; once
    /// this returns Ok, streaming proceeds without further fallback.
    async fn open_stream(&self, request: &GenerateRequest) -> Result<ProviderStream>;
}

/// Map an HTTP error status into the gateway taxonomy
pub(crate) fn error_for_status(kind: ProviderKind, status: u16, body: String) -> GatewayError {
    match status {
        401 | 403 => GatewayError::Configuration {
            message: format!("{kind} rejected credentials (HTTP {status})"),
        },
        429 => GatewayError::QuotaExceeded {
            provider: kind,
            reason: "provider returned 429".to_string(),
        },
        400..=499 => GatewayError::ProviderRequest {
            provider: kind,
            status,
            message: body,
        },
        _ => GatewayError::ProviderServer {
            provider: kind,
            status,
            message: body,
        },
    }
}

pub(crate) fn network_error(kind: ProviderKind, err: &reqwest::Error) -> GatewayError {
    GatewayError::Network {
        provider: kind,
        message: err.to_string(),
    }
}

/// Wrap a reqwest body stream into the gateway's byte stream
pub(crate) fn body_stream(kind: ProviderKind, response: reqwest::Response) -> ByteStream {
    response
        .bytes_stream()
        .map(move |chunk| chunk.map_err(|e| network_error(kind, &e)))
        .boxed()
}

fn parse_header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// OpenAI-style `x-ratelimit-*` headers, shared by every
/// OpenAI-shaped provider
pub(crate) fn parse_openai_ratelimit_headers(headers: &HeaderMap) -> QuotaSnapshot {
    QuotaSnapshot {
        requests_limit: parse_header_u32(headers, "x-ratelimit-limit-requests"),
        requests_remaining: parse_header_u32(headers, "x-ratelimit-remaining-requests"),
        tokens_limit: parse_header_u32(headers, "x-ratelimit-limit-tokens"),
        tokens_remaining: parse_header_u32(headers, "x-ratelimit-remaining-tokens"),
    }
}

/// Anthropic's `anthropic-ratelimit-*` header family
pub(crate) fn parse_anthropic_ratelimit_headers(headers: &HeaderMap) -> QuotaSnapshot {
    QuotaSnapshot {
        requests_limit: parse_header_u32(headers, "anthropic-ratelimit-requests-limit"),
        requests_remaining: parse_header_u32(headers, "anthropic-ratelimit-requests-remaining"),
        tokens_limit: parse_header_u32(headers, "anthropic-ratelimit-tokens-limit"),
        tokens_remaining: parse_header_u32(headers, "anthropic-ratelimit-tokens-remaining"),
    }
}

pub(crate) fn build_http_client(
    kind: ProviderKind,
    timeout: std::time::Duration,
) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Configuration {
            message: format!("failed to build HTTP client for {kind}: {e}"),
        })
}
