//! Provider kinds for routing

use serde::{Deserialize, Serialize};

/// The inference providers the gateway can route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Anthropic Claude API
    Anthropic,
    /// OpenAI API
    #[serde(rename = "openai")]
    OpenAi,
    /// Google Gemini API
    Gemini,
    /// Groq LPU inference (lowest latency)
    Groq,
    /// Perplexity Sonar (real-time web data)
    Perplexity,
    /// DeepSeek API (cheapest per token)
    #[serde(rename = "deepseek")]
    DeepSeek,
}

impl ProviderKind {
    /// All providers, in registry order
    pub const ALL: [ProviderKind; 6] = [
        Self::Anthropic,
        Self::OpenAi,
        Self::Gemini,
        Self::Groq,
        Self::Perplexity,
        Self::DeepSeek,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" | "gpt" => Some(Self::OpenAi),
            "gemini" | "google" => Some(Self::Gemini),
            "groq" => Some(Self::Groq),
            "perplexity" | "sonar" => Some(Self::Perplexity),
            "deepseek" => Some(Self::DeepSeek),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::Perplexity => "perplexity",
            Self::DeepSeek => "deepseek",
        }
    }

    /// Human-readable provider name for metadata frames
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Anthropic => "Anthropic Claude",
            Self::OpenAi => "OpenAI GPT",
            Self::Gemini => "Google Gemini",
            Self::Groq => "Groq",
            Self::Perplexity => "Perplexity Sonar",
            Self::DeepSeek => "DeepSeek",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
