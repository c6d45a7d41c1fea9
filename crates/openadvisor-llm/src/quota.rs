//! Per-provider quota and circuit state
//!
//! One `QuotaState` record per provider, shared across all in-flight
//! requests. All mutation goes through `QuotaStore::update`, which
//! serializes read-modify-write per provider via the map's entry
//! lock, so circuit transitions never interleave inconsistently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use openadvisor_types::ProviderKind;
use serde::Serialize;

use crate::clock::Clock;

/// Circuit breaker phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Built-in per-provider limits, used until the provider's response
/// headers supply authoritative numbers. Conservative on purpose -
/// a provider that never reports limits is never treated as
/// unlimited.
pub fn default_limits(kind: ProviderKind) -> (u32, u32) {
    match kind {
        ProviderKind::Anthropic => (50, 40_000),
        ProviderKind::OpenAi => (60, 90_000),
        ProviderKind::Gemini => (15, 32_000),
        ProviderKind::Groq => (30, 20_000),
        ProviderKind::Perplexity => (20, 25_000),
        ProviderKind::DeepSeek => (60, 60_000),
    }
}

/// Shared per-provider record of quota, latency, and circuit phase
#[derive(Debug, Clone, Serialize)]
pub struct QuotaState {
    pub requests_remaining: u32,
    pub requests_limit: u32,
    pub tokens_remaining: u32,
    pub tokens_limit: u32,
    pub avg_latency_ms: f64,
    pub consecutive_failures: u32,
    pub circuit: CircuitState,
    pub circuit_opened_at: Option<DateTime<Utc>>,
    /// Monotone counters, never reset
    pub reasoning_tokens_used: u64,
    pub total_cost_estimate: f64,
}

impl QuotaState {
    /// Fresh, fully available state for a provider observed for the
    /// first time
    pub fn fresh(kind: ProviderKind) -> Self {
        let (requests_limit, tokens_limit) = default_limits(kind);
        Self {
            requests_remaining: requests_limit,
            requests_limit,
            tokens_remaining: tokens_limit,
            tokens_limit,
            avg_latency_ms: 0.0,
            consecutive_failures: 0,
            circuit: CircuitState::Closed,
            circuit_opened_at: None,
            reasoning_tokens_used: 0,
            total_cost_estimate: 0.0,
        }
    }

    /// min(requests ratio, tokens ratio), the input to throttle
    /// strategy selection
    pub fn availability_ratio(&self) -> f64 {
        let requests = if self.requests_limit == 0 {
            0.0
        } else {
            f64::from(self.requests_remaining) / f64::from(self.requests_limit)
        };
        let tokens = if self.tokens_limit == 0 {
            0.0
        } else {
            f64::from(self.tokens_remaining) / f64::from(self.tokens_limit)
        };
        requests.min(tokens)
    }

    /// Overwrite quota counters with provider-reported values.
    /// Headers are authoritative; remaining is clamped to the limit.
    pub fn apply_snapshot(&mut self, snapshot: &QuotaSnapshot) {
        if let Some(limit) = snapshot.requests_limit {
            self.requests_limit = limit;
        }
        if let Some(remaining) = snapshot.requests_remaining {
            self.requests_remaining = remaining;
        }
        if let Some(limit) = snapshot.tokens_limit {
            self.tokens_limit = limit;
        }
        if let Some(remaining) = snapshot.tokens_remaining {
            self.tokens_remaining = remaining;
        }
        self.requests_remaining = self.requests_remaining.min(self.requests_limit);
        self.tokens_remaining = self.tokens_remaining.min(self.tokens_limit);
    }
}

/// Quota numbers parsed from one provider response. `None` fields
/// mean the provider did not report them; local estimates stand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub requests_limit: Option<u32>,
    pub requests_remaining: Option<u32>,
    pub tokens_limit: Option<u32>,
    pub tokens_remaining: Option<u32>,
}

/// Shared store of per-provider quota state.
///
/// Records are created lazily on first observation and never
/// deleted. The injected clock keeps circuit-recovery timing
/// testable.
pub struct QuotaStore {
    states: DashMap<ProviderKind, QuotaState>,
    clock: Arc<dyn Clock>,
}

impl QuotaStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read a copy of one provider's state, creating it fresh if this
    /// is the first observation
    pub fn snapshot(&self, kind: ProviderKind) -> QuotaState {
        self.states
            .entry(kind)
            .or_insert_with(|| QuotaState::fresh(kind))
            .clone()
    }

    /// Serialized read-modify-write against one provider's record.
    /// The entry lock is held for the duration of `f`; keep `f` free
    /// of I/O and sleeps.
    pub fn update<R>(&self, kind: ProviderKind, f: impl FnOnce(&mut QuotaState) -> R) -> R {
        let mut entry = self
            .states
            .entry(kind)
            .or_insert_with(|| QuotaState::fresh(kind));
        f(entry.value_mut())
    }

    /// Copy of every tracked provider's state, for status surfaces
    pub fn all(&self) -> Vec<(ProviderKind, QuotaState)> {
        self.states
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}
