//! Chat messages and the caller-facing generate request

use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Specification for a tool the model may call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Caller subscription tier - affects which providers are reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    #[default]
    Standard,
}

/// One logical "generate a reply" request.
///
/// Immutable once constructed; the gateway classifies it, routes it,
/// and streams back canonical events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// System instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Ordered conversation history (oldest first)
    #[serde(default)]
    pub history: Vec<Message>,
    /// Latest user message
    pub message: String,
    /// Tool definitions available to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    /// Whether the request carries a document attachment
    #[serde(default)]
    pub has_attachment: bool,
    /// Caller hint that latency matters more than depth
    #[serde(default)]
    pub speed_critical: bool,
    /// Caller subscription tier
    #[serde(default)]
    pub tier: Tier,
    /// Caller-forced provider - always wins over classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_provider: Option<ProviderKind>,
    /// Providers with a recorded error in this conversation,
    /// excluded from classification
    #[serde(default)]
    pub recent_failures: Vec<ProviderKind>,
    /// Max tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            system: None,
            history: vec![],
            message: message.into(),
            tools: None,
            has_attachment: false,
            speed_critical: false,
            tier: Tier::default(),
            force_provider: None,
            recent_failures: vec![],
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_attachment(mut self) -> Self {
        self.has_attachment = true;
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_forced_provider(mut self, provider: ProviderKind) -> Self {
        self.force_provider = Some(provider);
        self
    }

    /// Rough token estimate for the whole prompt, used for quota
    /// bookkeeping and cost estimates (never billing-accurate)
    pub fn estimated_prompt_tokens(&self) -> u32 {
        let chars: usize = self.system.as_deref().map(str::len).unwrap_or(0)
            + self.history.iter().map(|m| m.content.len()).sum::<usize>()
            + self.message.len();
        (chars / 4).max(1) as u32
    }
}
