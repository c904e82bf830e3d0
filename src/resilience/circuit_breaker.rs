//! Circuit Breaker
//!
//! Stops calling a failing dependency for a cooldown period.
//!
//! - Closed: normal operation, calls pass through
//! - Open: too many consecutive failures, calls fail fast
//! - HalfOpen: cooldown elapsed, one trial call at a time is admitted
//!
//! Any failure while HalfOpen reopens the circuit immediately.
//! Outcomes of calls admitted before the last state change are ignored.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Stand-in deadline when the cooldown does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive HalfOpen successes before closing the circuit
    pub success_threshold: u32,
    /// Cooldown before a trial call is admitted
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The call was rejected without running the operation
    #[error("circuit breaker is open")]
    Open,

    /// The operation ran and failed
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open)
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every state change
    generation: u64,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.success_count = 0;
        self.trial_in_flight = false;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Ticket handed out by `admit`
#[derive(Debug, Clone, Copy)]
struct Admission {
    generation: u64,
    is_trial: bool,
}

/// Shared circuit breaker; clones observe the same state
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

/// Releases the HalfOpen trial slot, including when the call is cancelled
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.lock();
        if inner.generation == self.generation {
            inner.trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt: None,
                trial_in_flight: false,
                generation: 0,
            })),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection.
    /// Every error counts as a failure.
    pub async fn call<Fut, T, E>(&self, operation: Fut) -> Result<T, CircuitBreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_filtered(operation, |_| true).await
    }

    /// Execute an operation, counting only errors accepted by
    /// `counts_as_failure` against the dependency.
    ///
    /// Other errors are passed through and leave the counters untouched.
    pub async fn call_filtered<Fut, T, E, P>(
        &self,
        operation: Fut,
        counts_as_failure: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let Some(admission) = self.admit() else {
            return Err(CircuitBreakerError::Open);
        };
        let _slot = admission.is_trial.then(|| TrialSlot {
            breaker: self,
            generation: admission.generation,
        });

        match operation.await {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(error) => {
                if counts_as_failure(&error) {
                    self.record_failure(admission);
                }
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    /// Decide whether a call may run; `None` rejects it
    fn admit(&self) -> Option<Admission> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Some(Admission {
                generation: inner.generation,
                is_trial: false,
            }),
            CircuitState::Open => {
                let cooled_down = inner
                    .next_attempt
                    .map_or(true, |next_attempt| Instant::now() >= next_attempt);
                if !cooled_down {
                    return None;
                }

                tracing::info!("Circuit breaker transitioning to HalfOpen");
                inner.transition(CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                Some(Admission {
                    generation: inner.generation,
                    is_trial: true,
                })
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                Some(Admission {
                    generation: inner.generation,
                    is_trial: true,
                })
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        if inner.generation != admission.generation {
            tracing::debug!("Ignoring success admitted under an earlier circuit state");
            return;
        }
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                tracing::info!(
                    successes = inner.success_count,
                    "Circuit breaker closing"
                );
                inner.transition(CircuitState::Closed);
                inner.next_attempt = None;
            }
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        if inner.generation != admission.generation {
            tracing::debug!("Ignoring failure admitted under an earlier circuit state");
            return;
        }
        inner.success_count = 0;
        inner.failure_count += 1;

        let should_open = match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!("Failure during half-open trial, reopening circuit");
                true
            }
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            if inner.state == CircuitState::Closed {
                tracing::warn!(
                    failures = inner.failure_count,
                    cooldown_ms = self.config.timeout.as_millis() as u64,
                    "Circuit breaker opening"
                );
            }
            let now = Instant::now();
            inner.transition(CircuitState::Open);
            inner.next_attempt = Some(
                now.checked_add(self.config.timeout)
                    .unwrap_or_else(|| now + FAR_FUTURE),
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Manually reset the circuit breaker
    pub fn reset(&self) {
        let mut inner = self.lock();
        tracing::info!("Circuit breaker manually reset");
        inner.transition(CircuitState::Closed);
        inner.failure_count = 0;
        inner.next_attempt = None;
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Poisoning is ignored: every update is a plain field write
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
