//! Retry coordinator - bounded, sequential delivery attempts with exponential backoff
//!
//! Transient failures are retried up to `max_attempts`, waiting 1s, 2s, ... between
//! attempts. A permanent failure ends the loop immediately regardless of the
//! remaining budget. Backoff waits end early when shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use wb_common::{DeliveryOutcome, ShutdownSignal};

use crate::mediator::Mediator;
use crate::metrics;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt ceiling, including the first attempt
    pub max_attempts: u32,
    /// Wait after the first transient failure
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Waits between attempts for a message that never succeeds.
    /// There is no wait after the final attempt.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut state = RetryState::new(self);
        let mut delays = Vec::new();
        while state.attempt < self.max_attempts {
            delays.push(state.backoff);
            state.advance(self);
        }
        delays
    }
}

/// Per-message retry bookkeeping; lives for one `deliver_with_retry` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// 1-based attempt number
    pub attempt: u32,
    /// Wait to apply if this attempt fails transiently
    pub backoff: Duration,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            backoff: policy.initial_backoff,
        }
    }

    fn advance(&mut self, policy: &RetryPolicy) {
        self.attempt += 1;
        self.backoff = self.backoff.saturating_mul(policy.multiplier);
    }
}

/// How a `deliver_with_retry` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReport {
    /// The sink accepted the payload
    Delivered { attempts: u32 },
    /// The sink returned a permanent failure; no further attempts were made
    Rejected { attempts: u32 },
    /// Every attempt failed transiently
    Exhausted { attempts: u32 },
    /// Shutdown arrived during a backoff wait
    Interrupted { attempts: u32 },
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryReport::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match *self {
            DeliveryReport::Delivered { attempts }
            | DeliveryReport::Rejected { attempts }
            | DeliveryReport::Exhausted { attempts }
            | DeliveryReport::Interrupted { attempts } => attempts,
        }
    }
}

pub struct RetryCoordinator {
    mediator: Arc<dyn Mediator>,
    policy: RetryPolicy,
    shutdown: ShutdownSignal,
}

impl RetryCoordinator {
    pub fn new(mediator: Arc<dyn Mediator>, policy: RetryPolicy, shutdown: ShutdownSignal) -> Self {
        Self {
            mediator,
            policy,
            shutdown,
        }
    }

    /// Deliver a payload, retrying transient failures with exponential backoff
    pub async fn deliver_with_retry(&self, payload: &[u8]) -> DeliveryReport {
        let max_attempts = self.policy.max_attempts;
        let mut state = RetryState::new(&self.policy);

        loop {
            info!(
                operation = "post_backend",
                attempt = state.attempt,
                max_attempts,
                "Attempting POST to backend"
            );

            let outcome = self.mediator.mediate(payload).await;
            metrics::record_attempt(outcome);

            match outcome {
                DeliveryOutcome::Success => {
                    info!(operation = "post_backend", attempt = state.attempt, "POST successful");
                    return DeliveryReport::Delivered { attempts: state.attempt };
                }
                DeliveryOutcome::PermanentFailure => {
                    warn!(
                        operation = "post_backend",
                        attempt = state.attempt,
                        outcome = %outcome,
                        "Non-temporary error, stopping retries"
                    );
                    return DeliveryReport::Rejected { attempts: state.attempt };
                }
                DeliveryOutcome::TransientFailure => {}
            }

            if state.attempt >= max_attempts {
                break;
            }

            warn!(
                operation = "post_backend",
                attempt = state.attempt,
                backoff_ms = state.backoff.as_millis() as u64,
                "Temporary error, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(state.backoff) => {}
                _ = self.shutdown.cancelled() => {
                    warn!(
                        operation = "post_backend",
                        attempt = state.attempt,
                        "Shutdown during backoff, abandoning delivery"
                    );
                    return DeliveryReport::Interrupted { attempts: state.attempt };
                }
            }

            state.advance(&self.policy);
        }

        error!(
            operation = "post_backend",
            attempts = state.attempt,
            max_attempts,
            "Failed to POST after all attempts"
        );
        DeliveryReport::Exhausted { attempts: state.attempt }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::Instant;
    use wb_common::Shutdown;

    /// Returns scripted outcomes, repeating the last one, and records call times
    struct ScriptedMediator {
        script: Mutex<VecDeque<DeliveryOutcome>>,
        fallback: DeliveryOutcome,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedMediator {
        fn new(script: Vec<DeliveryOutcome>) -> Arc<Self> {
            let fallback = *script.last().expect("script must not be empty");
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn always(outcome: DeliveryOutcome) -> Arc<Self> {
            Self::new(vec![outcome])
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        /// Offsets of each call relative to `start`
        fn call_offsets(&self, start: Instant) -> Vec<Duration> {
            self.calls.lock().iter().map(|t| t.duration_since(start)).collect()
        }
    }

    #[async_trait]
    impl Mediator for ScriptedMediator {
        async fn mediate(&self, _payload: &[u8]) -> DeliveryOutcome {
            self.calls.lock().push(Instant::now());
            self.script.lock().pop_front().unwrap_or(self.fallback)
        }
    }

    fn coordinator(mediator: Arc<ScriptedMediator>) -> RetryCoordinator {
        RetryCoordinator::new(mediator, RetryPolicy::default(), ShutdownSignal::never())
    }

    const PAYLOAD: &[u8] = br#"{"timestamp":"t","temperature":1,"humidity":2}"#;

    #[test]
    fn test_default_schedule_is_one_then_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(
            policy.schedule(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_single_attempt_policy_never_waits() {
        let policy = RetryPolicy { max_attempts: 1, ..RetryPolicy::default() };
        assert!(policy.schedule().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let mediator = ScriptedMediator::always(DeliveryOutcome::Success);
        let start = Instant::now();

        let report = coordinator(mediator.clone()).deliver_with_retry(PAYLOAD).await;

        assert_eq!(report, DeliveryReport::Delivered { attempts: 1 });
        assert_eq!(mediator.call_count(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let mediator = ScriptedMediator::always(DeliveryOutcome::PermanentFailure);
        let start = Instant::now();

        let report = coordinator(mediator.clone()).deliver_with_retry(PAYLOAD).await;

        assert!(!report.is_delivered());
        assert_eq!(report, DeliveryReport::Rejected { attempts: 1 });
        assert_eq!(mediator.call_count(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_hit_the_ceiling() {
        let mediator = ScriptedMediator::always(DeliveryOutcome::TransientFailure);
        let start = Instant::now();

        let report = coordinator(mediator.clone()).deliver_with_retry(PAYLOAD).await;

        assert!(!report.is_delivered());
        assert_eq!(report, DeliveryReport::Exhausted { attempts: 3 });
        assert_eq!(mediator.call_count(), 3);
        assert_eq!(
            mediator.call_offsets(start),
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]
        );
        // no wait after the third attempt
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_success_stops_retrying() {
        let mediator = ScriptedMediator::new(vec![
            DeliveryOutcome::TransientFailure,
            DeliveryOutcome::TransientFailure,
            DeliveryOutcome::Success,
        ]);
        let start = Instant::now();

        let report = coordinator(mediator.clone()).deliver_with_retry(PAYLOAD).await;

        assert_eq!(report, DeliveryReport::Delivered { attempts: 3 });
        assert_eq!(mediator.call_count(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_mid_sequence_short_circuits() {
        let mediator = ScriptedMediator::new(vec![
            DeliveryOutcome::TransientFailure,
            DeliveryOutcome::PermanentFailure,
            DeliveryOutcome::Success,
        ]);

        let report = coordinator(mediator.clone()).deliver_with_retry(PAYLOAD).await;

        assert_eq!(report, DeliveryReport::Rejected { attempts: 2 });
        assert_eq!(mediator.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let mediator = ScriptedMediator::always(DeliveryOutcome::TransientFailure);
        let shutdown = Shutdown::new();
        let coordinator = RetryCoordinator::new(
            mediator.clone(),
            RetryPolicy::default(),
            shutdown.signal(),
        );

        let task = tokio::spawn(async move { coordinator.deliver_with_retry(PAYLOAD).await });

        // Let the first attempt run and the coordinator enter its 1s wait
        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.trigger();

        let report = task.await.unwrap();
        assert_eq!(report, DeliveryReport::Interrupted { attempts: 1 });
        assert_eq!(mediator.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_policy_is_honoured() {
        let mediator = ScriptedMediator::always(DeliveryOutcome::TransientFailure);
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            multiplier: 3,
        };
        let start = Instant::now();

        let report = RetryCoordinator::new(mediator.clone(), policy, ShutdownSignal::never())
            .deliver_with_retry(PAYLOAD)
            .await;

        assert_eq!(report, DeliveryReport::Exhausted { attempts: 4 });
        // 100ms + 300ms + 900ms
        assert_eq!(start.elapsed(), Duration::from_millis(1300));
    }
}
