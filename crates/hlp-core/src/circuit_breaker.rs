//! Per-resource circuit breakers.
//!
//! Each logical resource key (an external dependency name) gets its own
//! breaker, so one failing dependency does not halt unrelated work. A breaker
//! opens after `failure_threshold` consecutive failures inside a sliding
//! window, rejects calls during the cool-down, then admits a single probe.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use hlp_types::config::CircuitBreakerConfig;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Dispatch to `resource` was short-circuited.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit open for resource '{resource}'")]
pub struct CircuitOpenError {
    pub resource: String,
    /// Time until the breaker will admit a probe.
    pub retry_after: Duration,
}

/// Circuit breaker state for one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Rejecting calls until the cool-down elapses.
    Open { opened_at: Instant },
    /// Admitting one probe at a time.
    HalfOpen {
        probe_in_flight: bool,
        successes: u32,
    },
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half_open",
        }
    }
}

/// Counters for one breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CircuitStats {
    pub resource: String,
    pub state: String,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub state_changes: u64,
    pub recent_failures: usize,
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Breaker for a single resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    resource: String,
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: VecDeque<Instant>,
    stats: CircuitStats,
}

impl CircuitBreaker {
    pub fn new(resource: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let resource = resource.into();
        Self {
            stats: CircuitStats {
                resource: resource.clone(),
                ..CircuitStats::default()
            },
            resource,
            config,
            state: CircuitState::Closed,
            failures: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &CircuitState {
        &self.state
    }

    fn cool_down(&self) -> Duration {
        Duration::from_millis(self.config.cool_down_ms)
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.config.window_ms)
    }

    fn set_state(&mut self, state: CircuitState) {
        if self.state.name() != state.name() {
            self.stats.state_changes += 1;
            tracing::debug!(
                resource = %self.resource,
                from = self.state.name(),
                to = state.name(),
                "circuit state change"
            );
        }
        self.state = state;
    }

    /// Ask to make a call. Moves Open -> HalfOpen once the cool-down elapses.
    pub fn try_acquire(&mut self) -> Result<(), CircuitOpenError> {
        let now = Instant::now();
        match self.state {
            CircuitState::Closed => {}
            CircuitState::Open { opened_at } => {
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed < self.cool_down() {
                    return Err(self.reject(self.cool_down() - elapsed));
                }
                self.set_state(CircuitState::HalfOpen {
                    probe_in_flight: true,
                    successes: 0,
                });
            }
            CircuitState::HalfOpen {
                probe_in_flight: true,
                ..
            } => {
                return Err(self.reject(self.cool_down()));
            }
            CircuitState::HalfOpen {
                probe_in_flight: false,
                successes,
            } => {
                self.state = CircuitState::HalfOpen {
                    probe_in_flight: true,
                    successes,
                };
            }
        }
        self.stats.total_calls += 1;
        Ok(())
    }

    fn reject(&mut self, retry_after: Duration) -> CircuitOpenError {
        self.stats.rejected_calls += 1;
        CircuitOpenError {
            resource: self.resource.clone(),
            retry_after,
        }
    }

    /// Give back an admitted call that never reached the resource.
    ///
    /// Only a half-open probe holds anything; releasing it lets the next
    /// call probe instead.
    pub fn release(&mut self) {
        if let CircuitState::HalfOpen {
            probe_in_flight: true,
            successes,
        } = self.state
        {
            self.state = CircuitState::HalfOpen {
                probe_in_flight: false,
                successes,
            };
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.stats.successful_calls += 1;
        match self.state {
            CircuitState::Closed => self.failures.clear(),
            CircuitState::HalfOpen { successes, .. } => {
                let successes = successes + 1;
                if successes >= self.config.success_threshold {
                    self.failures.clear();
                    self.set_state(CircuitState::Closed);
                } else {
                    self.state = CircuitState::HalfOpen {
                        probe_in_flight: false,
                        successes,
                    };
                }
            }
            // A call admitted before the trip finished late; keep the circuit open.
            CircuitState::Open { .. } => {}
        }
    }

    /// Record a failed call. Returns `true` if this failure opened the circuit.
    pub fn record_failure(&mut self) -> bool {
        let now = Instant::now();
        self.stats.failed_calls += 1;
        match self.state {
            CircuitState::Closed => {
                self.failures.push_back(now);
                let window = self.window();
                while let Some(&oldest) = self.failures.front() {
                    if now.saturating_duration_since(oldest) > window {
                        self.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if self.failures.len() as u32 >= self.config.failure_threshold {
                    self.trip_at(now);
                    return true;
                }
                false
            }
            CircuitState::HalfOpen { .. } => {
                self.trip_at(now);
                true
            }
            CircuitState::Open { .. } => false,
        }
    }

    fn trip_at(&mut self, now: Instant) {
        self.failures.clear();
        self.set_state(CircuitState::Open { opened_at: now });
        tracing::warn!(resource = %self.resource, "circuit opened");
    }

    /// Force the circuit open.
    pub fn trip(&mut self) {
        self.trip_at(Instant::now());
    }

    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            state: self.state.name().to_string(),
            recent_failures: self.failures.len(),
            ..self.stats.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Breakers keyed by resource, created on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, CircuitBreaker>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    fn with_breaker<T>(&self, resource: &str, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let mut entry = self
            .breakers
            .entry(resource.to_string())
            .or_insert_with(|| CircuitBreaker::new(resource, self.config.clone()));
        f(entry.value_mut())
    }

    pub fn try_acquire(&self, resource: &str) -> Result<(), CircuitOpenError> {
        self.with_breaker(resource, |b| b.try_acquire())
    }

    pub fn record_success(&self, resource: &str) {
        self.with_breaker(resource, |b| b.record_success());
    }

    /// Returns `true` if this failure opened the circuit.
    pub fn record_failure(&self, resource: &str) -> bool {
        self.with_breaker(resource, |b| b.record_failure())
    }

    pub fn release(&self, resource: &str) {
        self.with_breaker(resource, |b| b.release());
    }

    /// Force a resource's circuit open, creating its breaker if needed.
    pub fn trip(&self, resource: &str) {
        self.with_breaker(resource, |b| b.trip());
    }

    pub fn stats(&self, resource: &str) -> Option<CircuitStats> {
        self.breakers.get(resource).map(|b| b.stats())
    }

    /// Stats for every known resource, sorted by key.
    pub fn snapshot(&self) -> Vec<CircuitStats> {
        let mut all: Vec<CircuitStats> = self.breakers.iter().map(|b| b.stats()).collect();
        all.sort_by(|a, b| a.resource.cmp(&b.resource));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            success_threshold: 1,
            cool_down_ms: 1_000,
            window_ms: 10_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects_immediately() {
        let registry = CircuitBreakerRegistry::new(config(3));
        for i in 0..3 {
            registry.try_acquire("db").unwrap();
            let tripped = registry.record_failure("db");
            assert_eq!(tripped, i == 2);
        }

        let err = registry.try_acquire("db").unwrap_err();
        assert_eq!(err.resource, "db");
        assert!(err.retry_after <= Duration::from_millis(1_000));

        let stats = registry.stats("db").unwrap();
        assert_eq!(stats.state, "open");
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resources_are_isolated() {
        let registry = CircuitBreakerRegistry::new(config(1));
        registry.record_failure("db");
        assert!(registry.try_acquire("db").is_err());
        assert!(registry.try_acquire("cache").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_count() {
        let mut breaker = CircuitBreaker::new("api", config(3));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), &CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_window_are_forgotten() {
        let mut breaker = CircuitBreaker::new("api", config(2));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!breaker.record_failure());
        assert_eq!(breaker.state(), &CircuitState::Closed);
        assert!(breaker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_single_probe_then_closes() {
        let mut breaker = CircuitBreaker::new("api", config(1));
        breaker.record_failure();
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(1_001)).await;
        breaker.try_acquire().unwrap();
        assert!(matches!(breaker.state(), CircuitState::HalfOpen { .. }));
        // Second caller waits while the probe is out
        assert!(breaker.try_acquire().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), &CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let mut breaker = CircuitBreaker::new("api", config(1));
        breaker.record_failure();
        tokio::time::advance(Duration::from_millis(1_500)).await;
        breaker.try_acquire().unwrap();
        assert!(breaker.record_failure());
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn released_call_frees_half_open_slot() {
        let registry = CircuitBreakerRegistry::new(config(1));
        registry.record_failure("api");
        tokio::time::advance(Duration::from_millis(1_001)).await;
        registry.try_acquire("api").unwrap();
        assert!(registry.try_acquire("api").is_err());

        registry.release("api");
        registry.try_acquire("api").unwrap();
        registry.record_success("api");
        assert_eq!(registry.stats("api").unwrap().state, "closed");

        // Nothing to give back outside half-open
        registry.release("api");
        assert_eq!(registry.stats("api").unwrap().state, "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn success_threshold_requires_multiple_probes() {
        let mut breaker = CircuitBreaker::new(
            "api",
            CircuitBreakerConfig {
                success_threshold: 2,
                ..config(1)
            },
        );
        breaker.record_failure();
        tokio::time::advance(Duration::from_millis(1_001)).await;
        breaker.try_acquire().unwrap();
        breaker.record_success();
        assert!(matches!(
            breaker.state(),
            CircuitState::HalfOpen {
                probe_in_flight: false,
                successes: 1
            }
        ));
        breaker.try_acquire().unwrap();
        breaker.record_success();
        assert_eq!(breaker.state(), &CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trip_shows_in_snapshot() {
        let registry = CircuitBreakerRegistry::new(config(5));
        registry.trip("queue");
        assert!(registry.try_acquire("queue").is_err());

        registry.try_acquire("api").unwrap();
        registry.record_success("api");
        let snapshot = registry.snapshot();
        let states: Vec<(&str, &str)> = snapshot
            .iter()
            .map(|s| (s.resource.as_str(), s.state.as_str()))
            .collect();
        assert_eq!(states, vec![("api", "closed"), ("queue", "open")]);
        assert_eq!(snapshot[1].rejected_calls, 1);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        registry.try_acquire("queue").unwrap();
        registry.record_success("queue");
        assert_eq!(registry.stats("queue").unwrap().state, "closed");
    }
}
