//! Canonical stream events - the normalized incremental output

use serde::{Deserialize, Serialize};

use crate::classify::QueryType;
use crate::provider::ProviderKind;

/// A fragment of a streamed tool call.
///
/// Providers emit tool calls incrementally; `id` and `name` arrive
/// once, argument JSON arrives in pieces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Partial argument JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One event on the canonical stream.
///
/// Every dispatch yields exactly one `ModelIndicator` head event,
/// zero or more `Delta`/`ToolCall` events in provider emission order,
/// and exactly one terminal `Done` - even when the provider stream
/// closes without its own end sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Head event identifying which provider actually serves the
    /// request
    #[serde(rename_all = "camelCase")]
    ModelIndicator {
        provider: ProviderKind,
        model: String,
        model_name: String,
        query_type: QueryType,
    },
    /// Incremental text
    Delta { text: String },
    /// Incremental tool-call fragment
    ToolCall { fragment: ToolCallFragment },
    /// Terminal sentinel
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn done() -> Self {
        Self::Done { finish_reason: None }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}
