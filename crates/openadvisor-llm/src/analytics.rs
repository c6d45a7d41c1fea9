//! Dispatch analytics
//!
//! One record per dispatch, fire-and-forget: recording must never
//! block or fail the caller-visible response. The sink is injected so
//! an external store can replace the tracing-backed default.

use chrono::{DateTime, Utc};
use openadvisor_types::{ProviderKind, QueryType};
use serde::Serialize;

/// One analytics row per dispatch
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub request_id: String,
    pub provider: ProviderKind,
    pub model: String,
    pub was_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub query_type: QueryType,
    pub latency_ms: u64,
    pub estimated_prompt_tokens: u32,
    pub timestamp: DateTime<Utc>,
}

/// Sink for dispatch records. Implementations must return
/// immediately; anything slow belongs on a spawned task.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, record: DispatchRecord);
}

/// Default sink: structured log line per dispatch
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AnalyticsSink for TracingSink {
    fn record(&self, record: DispatchRecord) {
        tracing::info!(
            target: "openadvisor::analytics",
            request_id = %record.request_id,
            provider = %record.provider,
            model = %record.model,
            was_fallback = record.was_fallback,
            fallback_reason = record.fallback_reason.as_deref().unwrap_or(""),
            query_type = %record.query_type,
            latency_ms = record.latency_ms,
            estimated_prompt_tokens = record.estimated_prompt_tokens,
            "dispatch"
        );
    }
}
