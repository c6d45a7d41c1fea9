//! Gateway error taxonomy
//!
//! The taxonomy distinguishes failures that trigger fallback from
//! those that are fatal, and failures that count toward a provider's
//! circuit breaker from those that only reflect the request itself.

use thiserror::Error;

use crate::provider::ProviderKind;

/// Errors surfaced by the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing credential or invalid provider setup - fatal, no retry
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Local or provider-reported quota exhaustion - triggers fallback
    #[error("Quota exhausted for {provider}: {reason}")]
    QuotaExceeded {
        provider: ProviderKind,
        reason: String,
    },

    /// Circuit breaker tripped - triggers fallback
    #[error("Circuit open for {provider}")]
    CircuitOpen { provider: ProviderKind },

    /// 4xx other than auth/quota - triggers fallback, does not count
    /// toward the circuit
    #[error("Provider {provider} rejected request (HTTP {status}): {message}")]
    ProviderRequest {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    /// 5xx - triggers fallback and counts toward the circuit
    #[error("Provider {provider} server error (HTTP {status}): {message}")]
    ProviderServer {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    /// Transport failure or timeout - treated like any provider
    /// failure, counts toward the circuit
    #[error("Network error calling {provider}: {message}")]
    Network {
        provider: ProviderKind,
        message: String,
    },

    /// Single malformed chunk - recovered locally, stream continues
    #[error("Stream decode error: {message}")]
    StreamDecode { message: String },

    /// Every candidate in the fallback chain was exhausted -
    /// terminal, retryable later
    #[error("All providers unavailable")]
    AllProvidersExhausted,
}

impl GatewayError {
    /// Whether the router should advance to the next fallback
    /// candidate after this error
    pub fn triggers_fallback(&self) -> bool {
        match self {
            Self::QuotaExceeded { .. }
            | Self::CircuitOpen { .. }
            | Self::ProviderRequest { .. }
            | Self::ProviderServer { .. }
            | Self::Network { .. } => true,
            Self::Configuration { .. }
            | Self::StreamDecode { .. }
            | Self::AllProvidersExhausted => false,
        }
    }

    /// Whether this failure counts toward the provider's
    /// consecutive-failure tally
    pub fn counts_toward_circuit(&self) -> bool {
        matches!(self, Self::ProviderServer { .. } | Self::Network { .. })
    }

    /// End-user-safe message. Configuration failures are
    /// operator-facing and never shown verbatim.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AllProvidersExhausted => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Configuration { .. } => "The service is misconfigured. Please contact support.",
            _ => "Something went wrong generating a response. Please retry.",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
