//! OpenAdvisor LLM Gateway core
//!
//! Routes one logical "generate a reply" request to the provider best
//! suited to it, guards every provider with quota tracking and a
//! circuit breaker, falls back to alternates on failure, and
//! normalizes each provider's streaming encoding into one canonical
//! incremental event stream.
//!
//! Control flow:
//!
//! ```text
//! caller -> Router::dispatch
//!        -> classify            (pure, keyword + heuristics)
//!        -> AdaptiveLimiter::admit   (circuit phase, quota watermarks, throttle)
//!        -> ProviderClient::open_stream
//!        -> transcode           (provider wire -> canonical events)
//! ```
//!
//! On a pre-stream failure the router walks the category's fallback
//! chain; once streaming has begun there is no further fallback.

pub mod analytics;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod limiter;
pub mod providers;
pub mod quota;
pub mod router;
pub mod transcode;

pub use analytics::{AnalyticsSink, DispatchRecord, TracingSink};
pub use classifier::{apply_overrides, classify, RuleSet};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GatewayConfig, ProviderSettings};
pub use limiter::{AdaptiveLimiter, CallUsage, ThrottleStrategy};
pub use providers::{ByteStream, ProviderClient, ProviderStream, WireFamily};
pub use quota::{CircuitState, QuotaSnapshot, QuotaState, QuotaStore};
pub use router::{fallback_chain, fallback_order, CanonicalStream, Router};
pub use transcode::transcode;
