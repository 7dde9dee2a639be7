use forkpool_config::RestartConfig;
use serde::Serialize;
use std::time::Duration;

/// State of a slot's restart circuit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; quick crashes back off exponentially
    #[default]
    Closed,
    /// Too many quick crashes in a row; waiting out the cooldown
    Open,
    /// Trial spawn after a cooldown; one more quick crash reopens
    HalfOpen,
}

/// Exponential backoff with a cap and a per-slot circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub failure_threshold: u32,
    pub stable_after: Duration,
    pub cooldown: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&RestartConfig::default())
    }
}

impl RestartPolicy {
    pub fn from_config(config: &RestartConfig) -> Self {
        Self {
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
            failure_threshold: config.failure_threshold.max(1),
            stable_after: config.stable_after,
            cooldown: config.cooldown,
        }
    }

    /// Delay before respawning after `consecutive_failures` quick crashes.
    /// Zero failures means no delay.
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let exponent = consecutive_failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let scaled_nanos = self.initial_backoff.as_nanos() as f64 * factor;

        if !scaled_nanos.is_finite()
            || scaled_nanos >= self.max_backoff.as_nanos() as f64
        {
            return self.max_backoff;
        }
        Duration::from_nanos(scaled_nanos.round() as u64)
    }
}

/// What the supervisor should do after a worker exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Respawn after the given delay (zero for an immediate respawn).
    Respawn(Duration),
    /// The circuit opened; wait the cooldown before a half-open attempt.
    CircuitOpen(Duration),
}

impl RestartDecision {
    pub fn delay(&self) -> Duration {
        match *self {
            RestartDecision::Respawn(delay) => delay,
            RestartDecision::CircuitOpen(cooldown) => cooldown,
        }
    }
}

/// Per-slot restart bookkeeping.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    policy: RestartPolicy,
    consecutive_failures: u32,
    circuit: CircuitState,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            circuit: CircuitState::Closed,
        }
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn circuit(&self) -> CircuitState {
        self.circuit
    }

    /// Called right before a spawn attempt.
    pub fn begin_attempt(&mut self) {
        if self.circuit == CircuitState::Open {
            self.circuit = CircuitState::HalfOpen;
        }
    }

    /// The current worker has been up for `stable_after`.
    pub fn mark_stable(&mut self) {
        self.consecutive_failures = 0;
        self.circuit = CircuitState::Closed;
    }

    /// Records a worker exit after `uptime` (zero for a failed spawn).
    pub fn record_exit(&mut self, uptime: Duration) -> RestartDecision {
        if uptime >= self.policy.stable_after {
            self.mark_stable();
            return RestartDecision::Respawn(Duration::ZERO);
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.circuit == CircuitState::HalfOpen
            || self.consecutive_failures >= self.policy.failure_threshold
        {
            self.circuit = CircuitState::Open;
            return RestartDecision::CircuitOpen(self.policy.cooldown);
        }

        RestartDecision::Respawn(
            self.policy.backoff_for(self.consecutive_failures),
        )
    }
}
