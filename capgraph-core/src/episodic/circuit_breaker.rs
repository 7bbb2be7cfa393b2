//! State machine that trips the episodic flush path after repeated
//! failures and recovers on a half-open probe.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker tunables.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

struct State {
    circuit: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Fails fast once a flush sink has failed `failure_threshold` times in a
/// row, instead of retrying into a hung backend on every capture-triggered
/// flush.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<State>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Run `operation` if the circuit allows it; returns
    /// [`Error::ResourceExhausted`] immediately if the circuit is open.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.should_allow().await {
            debug!("circuit breaker open, rejecting flush attempt");
            return Err(Error::ResourceExhausted(
                "episodic flush circuit is open".into(),
            ));
        }

        let result = operation().await;
        self.record(result.is_ok()).await;
        result
    }

    async fn should_allow(&self) -> bool {
        let mut state = self.state.write().await;
        match state.circuit {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    info!("circuit breaker entering half-open state");
                    state.circuit = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn record(&self, success: bool) {
        let mut state = self.state.write().await;
        if success {
            state.consecutive_failures = 0;
            state.circuit = CircuitState::Closed;
            state.opened_at = None;
        } else {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.config.failure_threshold {
                state.circuit = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                info!(
                    failures = state.consecutive_failures,
                    "circuit breaker opened"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(60),
        });

        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(Error::Storage("boom".into())) })
                .await;
        }

        let result = breaker.call(|| async { Ok::<_, Error>(()) }).await;
        assert!(matches!(result, Err(Error::ResourceExhausted(_))));
    }

    #[tokio::test]
    async fn closes_again_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(10),
        });

        let _ = breaker
            .call(|| async { Err::<(), _>(Error::Storage("boom".into())) })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = breaker.call(|| async { Ok::<_, Error>(()) }).await;
        assert!(result.is_ok());
    }
}
