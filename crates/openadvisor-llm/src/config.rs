//! Provider configuration
//!
//! Everything comes from the environment: the API key decides whether
//! a provider exists at all; base URL, model, and timeout have
//! sensible defaults with `OPENADVISOR_*` overrides.

use std::time::Duration;

use openadvisor_types::ProviderKind;

/// Connection settings for one provider
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

struct ProviderDefaults {
    key_var: &'static str,
    base_url: &'static str,
    model: &'static str,
    timeout_secs: u64,
}

fn defaults(kind: ProviderKind) -> ProviderDefaults {
    match kind {
        ProviderKind::Anthropic => ProviderDefaults {
            key_var: "ANTHROPIC_API_KEY",
            base_url: "https://api.anthropic.com",
            model: "claude-3-5-sonnet-20241022",
            timeout_secs: 120,
        },
        ProviderKind::OpenAi => ProviderDefaults {
            key_var: "OPENAI_API_KEY",
            base_url: "https://api.openai.com/v1",
            model: "gpt-4o",
            timeout_secs: 120,
        },
        ProviderKind::Gemini => ProviderDefaults {
            key_var: "GEMINI_API_KEY",
            base_url: "https://generativelanguage.googleapis.com/v1beta",
            model: "gemini-2.0-flash",
            timeout_secs: 120,
        },
        ProviderKind::Groq => ProviderDefaults {
            key_var: "GROQ_API_KEY",
            base_url: "https://api.groq.com/openai/v1",
            model: "llama-3.3-70b-versatile",
            timeout_secs: 30,
        },
        ProviderKind::Perplexity => ProviderDefaults {
            key_var: "PERPLEXITY_API_KEY",
            base_url: "https://api.perplexity.ai",
            model: "sonar-pro",
            timeout_secs: 90,
        },
        ProviderKind::DeepSeek => ProviderDefaults {
            key_var: "DEEPSEEK_API_KEY",
            base_url: "https://api.deepseek.com/v1",
            model: "deepseek-chat",
            timeout_secs: 120,
        },
    }
}

impl ProviderSettings {
    /// Settings for one provider, `None` when its API key is absent
    pub fn from_env(kind: ProviderKind) -> Option<Self> {
        let defaults = defaults(kind);
        let api_key = std::env::var(defaults.key_var).ok().filter(|k| !k.is_empty())?;
        let prefix = kind.as_str().to_uppercase();

        let base_url = std::env::var(format!("OPENADVISOR_{prefix}_BASE_URL"))
            .unwrap_or_else(|_| defaults.base_url.to_string());
        let model = std::env::var(format!("OPENADVISOR_{prefix}_MODEL"))
            .unwrap_or_else(|_| defaults.model.to_string());
        let timeout_secs = std::env::var(format!("OPENADVISOR_{prefix}_TIMEOUT_SECS"))
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        Some(Self {
            api_key,
            base_url,
            model,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Resolved gateway configuration: the set of providers whose
/// credentials are present
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    providers: Vec<(ProviderKind, ProviderSettings)>,
}

impl GatewayConfig {
    /// Load from the environment (a `.env` file is honored when
    /// present)
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let providers = ProviderKind::ALL
            .into_iter()
            .filter_map(|kind| ProviderSettings::from_env(kind).map(|s| (kind, s)))
            .collect();
        Self { providers }
    }

    pub fn settings(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        self.providers
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, s)| s)
    }

    pub fn configured(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.providers.iter().map(|(k, _)| *k)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
