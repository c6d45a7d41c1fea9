//! OpenAdvisor Types - Canonical domain types for the LLM gateway
//!
//! Foundation crate with zero dependencies on other openadvisor crates.
//! Everything the gateway layers exchange lives here:
//!
//! - Chat messages and the caller-facing generate request
//! - Query classification (type, preferred provider, confidence, cost)
//! - Provider kinds for routing
//! - Canonical stream events (the normalized incremental output)
//! - The gateway error taxonomy

pub mod chat;
pub mod classify;
pub mod error;
pub mod provider;
pub mod stream;

pub use chat::*;
pub use classify::*;
pub use error::*;
pub use provider::*;
pub use stream::*;
