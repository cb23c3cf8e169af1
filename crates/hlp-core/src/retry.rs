//! Retry policy engine: retry eligibility and adaptive backoff.
//!
//! The raw delay grows with the failed-attempt count (exponential by default),
//! is capped at `max_delay_ms`, receives a jitter fraction drawn from the
//! unit's backoff seed, and is finally scaled by the risk tier's multiplier.
//! Jitter is added after the cap, so units sitting at the cap still spread
//! out over `[max, max * (1 + jitter_factor)]`.
//! The jitter fraction depends only on the seed, so a unit's delays are
//! reproducible across restarts and never shrink from one attempt to the next.

use std::sync::Arc;
use std::time::Duration;

use hlp_types::config::{BackoffStrategy, RetryPolicyConfig};
use hlp_types::failure::{ExecutionFailure, RetryRecord};
use hlp_types::plan::{PlanUnitDefinition, RiskTier};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// Caller-supplied classification of failures into retryable / permanent.
pub type RetryPredicate = Arc<dyn Fn(&ExecutionFailure) -> bool + Send + Sync>;

/// Transient failures and timeouts are retryable; validation failures are not.
/// Open-circuit deferrals are handled by the scheduler, outside the budget.
pub fn default_retry_predicate() -> RetryPredicate {
    Arc::new(|failure| {
        matches!(
            failure,
            ExecutionFailure::Transient(_) | ExecutionFailure::Timeout(_)
        )
    })
}

/// Deterministic backoff seed for a unit.
pub fn backoff_seed(idempotency_key: &str, tier: RiskTier) -> u64 {
    let digest = Sha256::digest(format!("{idempotency_key}:{tier}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

// ---------------------------------------------------------------------------
// RetryPolicyEngine
// ---------------------------------------------------------------------------

/// Computes whether and when a failed unit should run again.
#[derive(Clone)]
pub struct RetryPolicyEngine {
    config: RetryPolicyConfig,
    predicate: RetryPredicate,
}

impl RetryPolicyEngine {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self::with_predicate(config, default_retry_predicate())
    }

    pub fn with_predicate(config: RetryPolicyConfig, predicate: RetryPredicate) -> Self {
        Self { config, predicate }
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// Total attempts allowed for a tier, including the first.
    pub fn max_attempts(&self, tier: RiskTier) -> u32 {
        self.config.tiers.for_tier(tier).max_attempts
    }

    pub fn is_retryable(&self, failure: &ExecutionFailure) -> bool {
        (self.predicate)(failure)
    }

    /// Delay before the next attempt, or `None` when the unit should fail
    /// permanently.
    ///
    /// `record.attempt_count` is the number of failed attempts so far,
    /// including the one being classified.
    pub fn next_delay(
        &self,
        unit: &PlanUnitDefinition,
        record: &RetryRecord,
        failure: &ExecutionFailure,
    ) -> Option<Duration> {
        if !self.is_retryable(failure) {
            return None;
        }
        if record.attempt_count >= self.max_attempts(unit.risk_tier) {
            return None;
        }
        Some(self.delay_for(unit.risk_tier, record.attempt_count, record.backoff_seed))
    }

    /// Delay for a given attempt count, ignoring the retry budget.
    pub fn delay_for(&self, tier: RiskTier, attempt_count: u32, seed: u64) -> Duration {
        let max_ms = self.config.max_delay_ms as f64;
        let raw_ms = raw_delay_ms(
            self.config.strategy,
            self.config.base_delay_ms,
            attempt_count,
            tier,
        );
        let capped = raw_ms.min(max_ms);
        let jittered = capped * (1.0 + self.jitter_fraction(seed));
        let scaled = jittered * self.config.tiers.for_tier(tier).delay_multiplier.max(0.0);
        Duration::from_millis(scaled.round() as u64)
    }

    /// Jitter fraction in `[0, jitter_factor]`, fixed per seed.
    fn jitter_fraction(&self, seed: u64) -> f64 {
        let factor = if self.config.jitter_factor.is_finite() {
            self.config.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if factor == 0.0 {
            return 0.0;
        }
        let mut rng = StdRng::seed_from_u64(seed);
        rng.random_range(0.0..=factor)
    }
}

impl std::fmt::Debug for RetryPolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicyEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn raw_delay_ms(strategy: BackoffStrategy, base_ms: u64, attempt_count: u32, tier: RiskTier) -> f64 {
    let base = base_ms as f64;
    let exponential = base * 2f64.powi(attempt_count.min(62) as i32);
    match strategy {
        BackoffStrategy::Exponential => exponential,
        BackoffStrategy::Linear => base * attempt_count.max(1) as f64,
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Fibonacci => base * fibonacci(attempt_count.max(1)),
        BackoffStrategy::RiskAdaptive => exponential * (1.0 + tier.risk_score()),
    }
}

fn fibonacci(n: u32) -> f64 {
    let (mut a, mut b) = (0f64, 1f64);
    for _ in 0..n.min(90) {
        let next = a + b;
        a = b;
        b = next;
    }
    a
}
