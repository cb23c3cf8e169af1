//! Executor configuration types.
//!
//! `ExecutorSettings` is the top-level `config.toml` document. Every section
//! and field has a default, so a missing or partial file is always valid.

use serde::{Deserialize, Serialize};

use crate::checkpoint::RetentionPolicy;
use crate::plan::RiskTier;

/// Top-level executor settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub retry: RetryPolicyConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Worker slots per plan when the plan does not set `max_in_flight`.
    pub max_in_flight: usize,
    /// Unit execution timeout when the unit does not set `timeout_secs`.
    pub default_unit_timeout_secs: u64,
    /// Budget for a single semantic dependency query.
    pub resolver_timeout_ms: u64,
    /// Open-circuit deferrals allowed per unit before it fails permanently.
    pub max_circuit_deferrals: u32,
    /// Roll back failed phases automatically when a plan halts.
    pub auto_rollback: bool,
    /// Capacity of the executor event bus.
    pub event_capacity: usize,
}

fn default_max_in_flight() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            default_unit_timeout_secs: 300,
            resolver_timeout_ms: 2_000,
            max_circuit_deferrals: 20,
            auto_rollback: true,
            event_capacity: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// How the raw delay grows with the attempt count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * 2^attempt`
    #[default]
    Exponential,
    /// `base * attempt`
    Linear,
    /// `base`
    Fixed,
    /// `base * fib(attempt)`
    Fibonacci,
    /// `base * 2^attempt * (1 + risk_score)`, see [`RiskTier::risk_score`].
    RiskAdaptive,
}

/// Retry budget and delay scaling for one risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    /// Applied to the jittered delay.
    pub delay_multiplier: f64,
}

/// Per-tier retry policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicies {
    pub low: TierPolicy,
    pub medium: TierPolicy,
    pub high: TierPolicy,
    pub critical: TierPolicy,
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            low: TierPolicy {
                max_attempts: 5,
                delay_multiplier: 1.0,
            },
            medium: TierPolicy {
                max_attempts: 4,
                delay_multiplier: 1.0,
            },
            high: TierPolicy {
                max_attempts: 3,
                delay_multiplier: 1.0,
            },
            critical: TierPolicy {
                max_attempts: 2,
                delay_multiplier: 0.5,
            },
        }
    }
}

impl TierPolicies {
    pub fn for_tier(&self, tier: RiskTier) -> &TierPolicy {
        match tier {
            RiskTier::Low => &self.low,
            RiskTier::Medium => &self.medium,
            RiskTier::High => &self.high,
            RiskTier::Critical => &self.critical,
        }
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the jitter fraction, in `[0, 1]`.
    pub jitter_factor: f64,
    pub tiers: TierPolicies,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.1,
            tiers: TierPolicies::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Circuit breaker settings, shared by every resource key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures inside `window_ms` that open the circuit.
    pub failure_threshold: u32,
    /// Successful half-open probes needed to close the circuit again.
    pub success_threshold: u32,
    /// Time the circuit stays open before admitting a probe.
    pub cool_down_ms: u64,
    /// Sliding window for counting failures.
    pub window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cool_down_ms: 60_000,
            window_ms: 60_000,
        }
    }
}
