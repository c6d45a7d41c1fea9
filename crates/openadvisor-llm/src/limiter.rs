//! Adaptive per-provider limiter
//!
//! Combines the circuit breaker state machine with quota-aware
//! throttling. Admission is optimistic: the throttle decision is made
//! under the per-provider lock, the delay is slept outside it, and no
//! quota is reserved - brief over-admission under high concurrency is
//! accepted. Circuit transitions themselves are serialized by the
//! store's entry lock.
//!
//! Circuit edges: closed -> open (failure threshold reached),
//! open -> half_open (recovery time elapsed, evaluated lazily at
//! admission), half_open -> closed (probe succeeded) or
//! half_open -> open (probe failed). Exactly one call probes
//! recovery: the caller whose admission performs the open ->
//! half_open transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use openadvisor_types::{GatewayError, ProviderKind, Result};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::quota::{CircuitState, QuotaSnapshot, QuotaStore};

/// Consecutive failures that trip the circuit
pub const FAILURE_THRESHOLD: u32 = 3;
/// How long an open circuit waits before allowing a probe
pub const RECOVERY_TIME_SECS: i64 = 60;
/// Reject admission below these remaining-quota watermarks
pub const REQUEST_LOW_WATERMARK: u32 = 5;
pub const TOKEN_LOW_WATERMARK: u32 = 1_000;

/// Named throttle strategy derived from remaining-quota ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleStrategy {
    /// ratio > 0.7 - no delay
    Aggressive,
    /// ratio > 0.3 - 100-200ms
    Moderate,
    /// ratio > 0.1 - 500-1000ms
    Conservative,
    /// ratio <= 0.1 - 2000-3000ms
    Critical,
}

impl ThrottleStrategy {
    pub fn for_ratio(ratio: f64) -> Self {
        if ratio > 0.7 {
            Self::Aggressive
        } else if ratio > 0.3 {
            Self::Moderate
        } else if ratio > 0.1 {
            Self::Conservative
        } else {
            Self::Critical
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Moderate => "moderate",
            Self::Conservative => "conservative",
            Self::Critical => "critical",
        }
    }

    /// Jittered delay within the strategy's range
    pub fn delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        match self {
            Self::Aggressive => Duration::ZERO,
            Self::Moderate => Duration::from_millis(rng.gen_range(100..=200)),
            Self::Conservative => Duration::from_millis(rng.gen_range(500..=1000)),
            Self::Critical => Duration::from_millis(rng.gen_range(2000..=3000)),
        }
    }
}

/// What one completed call consumed, for post-call accounting
#[derive(Debug, Clone, Copy, Default)]
pub struct CallUsage {
    /// Prompt + expected completion tokens (estimate)
    pub estimated_tokens: u32,
    /// Reasoning tokens reported by the provider, if any
    pub reasoning_tokens: u64,
    /// Estimated cost of this call in USD
    pub estimated_cost: f64,
}

/// Per-provider admission control over the shared quota store
#[derive(Clone)]
pub struct AdaptiveLimiter {
    store: Arc<QuotaStore>,
}

impl AdaptiveLimiter {
    pub fn new(store: Arc<QuotaStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<QuotaStore> {
        &self.store
    }

    /// Admission decision without the throttle sleep. Performs the
    /// lazy open -> half_open transition; the caller that observes it
    /// becomes the single recovery probe.
    pub fn check(&self, kind: ProviderKind) -> Result<ThrottleStrategy> {
        let now = self.store.now();
        self.store.update(kind, |state| {
            let mut probing = false;
            match state.circuit {
                CircuitState::Closed => {}
                CircuitState::Open => {
                    let elapsed = state
                        .circuit_opened_at
                        .map(|at| now - at)
                        .unwrap_or_else(ChronoDuration::zero);
                    if elapsed >= ChronoDuration::seconds(RECOVERY_TIME_SECS) {
                        state.circuit = CircuitState::HalfOpen;
                        probing = true;
                        info!(provider = %kind, "circuit half-open, probing recovery");
                    } else {
                        return Err(GatewayError::CircuitOpen { provider: kind });
                    }
                }
                // A probe is already under way; only one call may test
                // recovery.
                CircuitState::HalfOpen => {
                    return Err(GatewayError::CircuitOpen { provider: kind });
                }
            }

            if state.requests_remaining < REQUEST_LOW_WATERMARK
                || state.tokens_remaining < TOKEN_LOW_WATERMARK
            {
                // The would-be probe never launched; let the next
                // admission attempt the transition again.
                if probing {
                    state.circuit = CircuitState::Open;
                }
                return Err(GatewayError::QuotaExceeded {
                    provider: kind,
                    reason: format!(
                        "{} requests / {} tokens remaining",
                        state.requests_remaining, state.tokens_remaining
                    ),
                });
            }

            let ratio = state.availability_ratio();
            let strategy = ThrottleStrategy::for_ratio(ratio);
            debug!(
                provider = %kind,
                ratio,
                strategy = strategy.name(),
                "admission granted"
            );
            Ok(strategy)
        })
    }

    /// Full admission: decide, sleep the throttle delay outside the
    /// lock, then admit
    pub async fn admit(&self, kind: ProviderKind) -> Result<ThrottleStrategy> {
        let strategy = self.check(kind)?;
        let delay = strategy.delay();
        if !delay.is_zero() {
            debug!(provider = %kind, delay_ms = delay.as_millis() as u64, "throttling");
            tokio::time::sleep(delay).await;
        }
        Ok(strategy)
    }

    /// Post-call accounting for a successful call. Provider headers
    /// are authoritative; where absent, the local estimate is
    /// decremented instead.
    pub fn record_success(
        &self,
        kind: ProviderKind,
        latency_ms: u64,
        snapshot: &QuotaSnapshot,
        usage: &CallUsage,
    ) {
        self.store.update(kind, |state| {
            state.consecutive_failures = 0;
            if state.circuit == CircuitState::HalfOpen {
                state.circuit = CircuitState::Closed;
                state.circuit_opened_at = None;
                info!(provider = %kind, "probe succeeded, circuit closed");
            }

            let had_request_header = snapshot.requests_remaining.is_some();
            let had_token_header = snapshot.tokens_remaining.is_some();
            state.apply_snapshot(snapshot);
            if !had_request_header {
                state.requests_remaining = state.requests_remaining.saturating_sub(1);
            }
            if !had_token_header {
                state.tokens_remaining =
                    state.tokens_remaining.saturating_sub(usage.estimated_tokens);
            }

            if state.avg_latency_ms == 0.0 {
                state.avg_latency_ms = latency_ms as f64;
            } else {
                state.avg_latency_ms = state.avg_latency_ms * 0.8 + latency_ms as f64 * 0.2;
            }

            state.reasoning_tokens_used += usage.reasoning_tokens;
            state.total_cost_estimate += usage.estimated_cost;
        });
    }

    /// Post-call accounting for a circuit-counting failure
    pub fn record_failure(&self, kind: ProviderKind) {
        let now = self.store.now();
        self.store.update(kind, |state| {
            state.consecutive_failures += 1;
            match state.circuit {
                CircuitState::HalfOpen => {
                    state.circuit = CircuitState::Open;
                    state.circuit_opened_at = Some(now);
                    warn!(provider = %kind, "probe failed, circuit reopened");
                }
                CircuitState::Closed if state.consecutive_failures >= FAILURE_THRESHOLD => {
                    state.circuit = CircuitState::Open;
                    state.circuit_opened_at = Some(now);
                    warn!(
                        provider = %kind,
                        failures = state.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                }
                _ => {}
            }
        });
    }

    /// Provider reported 429: empty the request budget so admission
    /// rejects until headers refresh it. Does not count toward the
    /// circuit.
    pub fn record_rate_limited(&self, kind: ProviderKind) {
        self.store.update(kind, |state| {
            state.requests_remaining = 0;
        });
        warn!(provider = %kind, "provider rate limited, request budget emptied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;

    fn limiter_with_clock() -> (AdaptiveLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(QuotaStore::new(clock.clone()));
        (AdaptiveLimiter::new(store), clock)
    }

    const KIND: ProviderKind = ProviderKind::OpenAi;

    #[test]
    fn test_strategy_thresholds() {
        assert_eq!(ThrottleStrategy::for_ratio(0.9), ThrottleStrategy::Aggressive);
        assert_eq!(ThrottleStrategy::for_ratio(0.5), ThrottleStrategy::Moderate);
        assert_eq!(ThrottleStrategy::for_ratio(0.2), ThrottleStrategy::Conservative);
        assert_eq!(ThrottleStrategy::for_ratio(0.05), ThrottleStrategy::Critical);
        // boundaries are exclusive
        assert_eq!(ThrottleStrategy::for_ratio(0.7), ThrottleStrategy::Moderate);
        assert_eq!(ThrottleStrategy::for_ratio(0.3), ThrottleStrategy::Conservative);
        assert_eq!(ThrottleStrategy::for_ratio(0.1), ThrottleStrategy::Critical);
    }

    #[test]
    fn test_delay_ranges() {
        assert_eq!(ThrottleStrategy::Aggressive.delay(), Duration::ZERO);
        for _ in 0..32 {
            let moderate = ThrottleStrategy::Moderate.delay().as_millis();
            assert!((100..=200).contains(&moderate));
            let critical = ThrottleStrategy::Critical.delay().as_millis();
            assert!((2000..=3000).contains(&critical));
        }
    }

    #[test]
    fn test_threshold_exact_failure_count_trips_circuit() {
        let (limiter, _clock) = limiter_with_clock();

        limiter.record_failure(KIND);
        limiter.record_failure(KIND);
        let state = limiter.store().snapshot(KIND);
        assert_eq!(state.circuit, CircuitState::Closed, "2 failures must not trip");

        limiter.record_failure(KIND);
        let state = limiter.store().snapshot(KIND);
        assert_eq!(state.circuit, CircuitState::Open);
        assert!(state.circuit_opened_at.is_some(), "open implies opened_at set");
    }

    #[test]
    fn test_open_rejects_before_recovery_time() {
        let (limiter, clock) = limiter_with_clock();
        for _ in 0..FAILURE_THRESHOLD {
            limiter.record_failure(KIND);
        }
        clock.advance(ChronoDuration::seconds(RECOVERY_TIME_SECS - 1));
        assert!(matches!(
            limiter.check(KIND),
            Err(GatewayError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_lazy_half_open_transition_before_quota() {
        let (limiter, clock) = limiter_with_clock();
        for _ in 0..FAILURE_THRESHOLD {
            limiter.record_failure(KIND);
        }
        clock.advance(ChronoDuration::seconds(RECOVERY_TIME_SECS + 1));

        let decision = limiter.check(KIND);
        assert!(decision.is_ok(), "probe admission expected: {decision:?}");
        assert_eq!(limiter.store().snapshot(KIND).circuit, CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_allows_exactly_one_probe() {
        let (limiter, clock) = limiter_with_clock();
        for _ in 0..FAILURE_THRESHOLD {
            limiter.record_failure(KIND);
        }
        clock.advance(ChronoDuration::seconds(RECOVERY_TIME_SECS + 1));

        assert!(limiter.check(KIND).is_ok());
        // second caller while the probe is in flight
        assert!(matches!(
            limiter.check(KIND),
            Err(GatewayError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_probe_success_closes_circuit() {
        let (limiter, clock) = limiter_with_clock();
        for _ in 0..FAILURE_THRESHOLD {
            limiter.record_failure(KIND);
        }
        clock.advance(ChronoDuration::seconds(RECOVERY_TIME_SECS + 1));
        limiter.check(KIND).unwrap();

        limiter.record_success(KIND, 120, &QuotaSnapshot::default(), &CallUsage::default());
        let state = limiter.store().snapshot(KIND);
        assert_eq!(state.circuit, CircuitState::Closed);
        assert!(state.circuit_opened_at.is_none());
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn test_probe_failure_reopens_circuit() {
        let (limiter, clock) = limiter_with_clock();
        for _ in 0..FAILURE_THRESHOLD {
            limiter.record_failure(KIND);
        }
        clock.advance(ChronoDuration::seconds(RECOVERY_TIME_SECS + 1));
        limiter.check(KIND).unwrap();

        limiter.record_failure(KIND);
        let state = limiter.store().snapshot(KIND);
        assert_eq!(state.circuit, CircuitState::Open);
        assert!(state.circuit_opened_at.is_some());
    }

    /// closed -> open -> half_open -> {closed|open} is the full edge
    /// set; a success in closed keeps closed, failures below the
    /// threshold keep closed, and no path skips half_open on the way
    /// back from open.
    #[test]
    fn test_no_other_edges_reachable() {
        let (limiter, clock) = limiter_with_clock();

        // success in closed keeps closed
        limiter.record_success(KIND, 50, &QuotaSnapshot::default(), &CallUsage::default());
        assert_eq!(limiter.store().snapshot(KIND).circuit, CircuitState::Closed);

        // open cannot reach closed without a half_open probe
        for _ in 0..FAILURE_THRESHOLD {
            limiter.record_failure(KIND);
        }
        limiter.record_success(KIND, 50, &QuotaSnapshot::default(), &CallUsage::default());
        assert_eq!(
            limiter.store().snapshot(KIND).circuit,
            CircuitState::Open,
            "success while open must not close the circuit"
        );

        // half_open is reachable only after the recovery window
        clock.advance(ChronoDuration::seconds(RECOVERY_TIME_SECS + 1));
        limiter.check(KIND).unwrap();
        assert_eq!(limiter.store().snapshot(KIND).circuit, CircuitState::HalfOpen);
    }

    #[test]
    fn test_quota_watermark_rejection() {
        let (limiter, _clock) = limiter_with_clock();
        limiter.store().update(KIND, |state| {
            state.tokens_remaining = 0;
        });
        match limiter.check(KIND) {
            Err(GatewayError::QuotaExceeded { provider, .. }) => assert_eq!(provider, KIND),
            other => panic!("expected quota rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_quota_rejected_probe_reverts_to_open() {
        let (limiter, clock) = limiter_with_clock();
        for _ in 0..FAILURE_THRESHOLD {
            limiter.record_failure(KIND);
        }
        limiter.store().update(KIND, |state| {
            state.requests_remaining = 0;
        });
        clock.advance(ChronoDuration::seconds(RECOVERY_TIME_SECS + 1));

        assert!(matches!(
            limiter.check(KIND),
            Err(GatewayError::QuotaExceeded { .. })
        ));
        // the probe never launched, so the next admission may try again
        assert_eq!(limiter.store().snapshot(KIND).circuit, CircuitState::Open);
    }

    #[test]
    fn test_success_decrements_local_estimates_without_headers() {
        let (limiter, _clock) = limiter_with_clock();
        let before = limiter.store().snapshot(KIND);
        let usage = CallUsage {
            estimated_tokens: 500,
            reasoning_tokens: 0,
            estimated_cost: 0.01,
        };
        limiter.record_success(KIND, 200, &QuotaSnapshot::default(), &usage);
        let after = limiter.store().snapshot(KIND);
        assert_eq!(after.requests_remaining, before.requests_remaining - 1);
        assert_eq!(after.tokens_remaining, before.tokens_remaining - 500);
        assert!(after.total_cost_estimate > before.total_cost_estimate);
    }

    #[test]
    fn test_headers_are_authoritative() {
        let (limiter, _clock) = limiter_with_clock();
        let snapshot = QuotaSnapshot {
            requests_limit: Some(100),
            requests_remaining: Some(42),
            tokens_limit: Some(50_000),
            tokens_remaining: Some(7_777),
        };
        limiter.record_success(KIND, 90, &snapshot, &CallUsage::default());
        let state = limiter.store().snapshot(KIND);
        assert_eq!(state.requests_remaining, 42);
        assert_eq!(state.tokens_remaining, 7_777);
    }

    #[test]
    fn test_rate_limited_empties_request_budget() {
        let (limiter, _clock) = limiter_with_clock();
        limiter.record_rate_limited(KIND);
        assert!(matches!(
            limiter.check(KIND),
            Err(GatewayError::QuotaExceeded { .. })
        ));
        // 429 does not trip the circuit
        assert_eq!(limiter.store().snapshot(KIND).circuit, CircuitState::Closed);
    }
}
