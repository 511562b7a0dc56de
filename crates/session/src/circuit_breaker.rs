//! Circuit breaker guarding reconnect attempts, grounded on the teacher's
//! `services/adapters/src/circuit_breaker.rs`, generalized from that file's
//! single-venue-wide breaker to one instance owned per [`crate::session::Session`].

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    pub half_open_max_failures: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            half_open_max_failures: 1,
        }
    }
}

pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_time: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    circuit_opens: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_time: RwLock::new(None),
            config,
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            circuit_opens: AtomicU64::new(0),
        }
    }

    pub async fn should_attempt(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last_failure = *self.last_failure_time.read().await;
                match last_failure {
                    Some(failure_time) if failure_time.elapsed() >= self.config.recovery_timeout => {
                        *state = CircuitState::HalfOpen;
                        self.failure_count.store(0, Ordering::Relaxed);
                        self.success_count.store(0, Ordering::Relaxed);
                        tracing::info!("circuit breaker transitioning to half-open");
                        true
                    }
                    _ => false,
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub async fn on_success(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.config.success_threshold {
                    *state = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::Relaxed);
                    tracing::info!(successes, "circuit breaker closed");
                }
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn on_failure(&self) {
        let mut state = self.state.write().await;
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failure_time.write().await = Some(Instant::now());

        match *state {
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                *state = CircuitState::Open;
                self.circuit_opens.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(failures, "circuit breaker opened");
            }
            CircuitState::HalfOpen if failures >= self.config.half_open_max_failures => {
                *state = CircuitState::Open;
                self.circuit_opens.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("circuit breaker reopened from half-open");
            }
            _ => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            circuit_opens: self.circuit_opens.load(Ordering::Relaxed),
            current_failure_count: self.failure_count.load(Ordering::Relaxed),
        }
    }

    pub async fn reset(&self) {
        *self.state.write().await = CircuitState::Closed;
        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        *self.last_failure_time.write().await = None;
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub total_requests: u64,
    pub total_failures: u64,
    pub circuit_opens: u64,
    pub current_failure_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });
        assert!(breaker.should_attempt().await);
        breaker.on_failure().await;
        assert!(breaker.should_attempt().await);
        breaker.on_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.should_attempt().await);
    }

    #[tokio::test]
    async fn success_resets_failure_count_when_closed() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        breaker.on_failure().await;
        breaker.on_success().await;
        assert_eq!(breaker.metrics().current_failure_count, 0);
    }
}
