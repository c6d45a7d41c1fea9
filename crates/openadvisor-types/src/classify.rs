//! Query classification types

use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// Coarse query category assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Short factual or conversational query
    Simple,
    /// Multi-step analysis or long-form reasoning
    Complex,
    /// Needs real-time market data
    MarketData,
    /// Operates on an attached document
    DocumentAnalysis,
    /// Latency matters more than depth
    SpeedCritical,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Complex => "complex",
            Self::MarketData => "market_data",
            Self::DocumentAnalysis => "document_analysis",
            Self::SpeedCritical => "speed_critical",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of classifying a request.
///
/// Derived per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub query_type: QueryType,
    /// Preferred provider for this category
    pub provider: ProviderKind,
    /// Classifier confidence in [0, 1]
    pub confidence: f32,
    /// Estimated per-call cost in USD - analytics only, never
    /// admission control
    pub estimated_cost: f64,
}
