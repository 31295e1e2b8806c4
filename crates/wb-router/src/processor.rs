//! Message processor - turns one payload into an acknowledgment decision
//!
//! Start -> validate -> (Rejected | Validated -> deliver -> (Delivered | Failed)).
//! Malformed payloads are discarded; well-formed payloads that could not be
//! delivered are always requeued, even after a permanent failure, since a 4xx
//! may come from a temporarily misconfigured sink.

use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use wb_common::{AckDecision, ShutdownSignal};

use crate::mediator::Mediator;
use crate::metrics;
use crate::retry::{DeliveryReport, RetryCoordinator, RetryPolicy};
use crate::validator;

pub struct MessageProcessor {
    coordinator: RetryCoordinator,
}

impl MessageProcessor {
    pub fn new(coordinator: RetryCoordinator) -> Self {
        Self { coordinator }
    }

    /// Build a processor around a mediator with the given policy
    pub fn with_mediator(
        mediator: Arc<dyn Mediator>,
        policy: RetryPolicy,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self::new(RetryCoordinator::new(mediator, policy, shutdown))
    }

    /// Decide the fate of one queue message
    pub async fn process(&self, payload: &[u8]) -> AckDecision {
        let start = Instant::now();

        let decision = if !validator::validate(payload) {
            error!(
                operation = "validate_json",
                message_size = payload.len(),
                decision = %AckDecision::RejectDiscard,
                "Invalid payload, rejecting message"
            );
            AckDecision::RejectDiscard
        } else {
            let report = self.coordinator.deliver_with_retry(payload).await;
            Self::decide(report)
        };

        metrics::record_decision(decision, start.elapsed());
        decision
    }

    fn decide(report: DeliveryReport) -> AckDecision {
        let attempts = report.attempts();
        match report {
            DeliveryReport::Delivered { .. } => {
                info!(operation = "process_message", attempts, "Message delivered");
                AckDecision::Acknowledge
            }
            DeliveryReport::Rejected { .. }
            | DeliveryReport::Exhausted { .. }
            | DeliveryReport::Interrupted { .. } => {
                warn!(
                    operation = "process_message",
                    attempts,
                    report = ?report,
                    decision = %AckDecision::RejectAndRequeue,
                    "Delivery failed, message will be requeued"
                );
                AckDecision::RejectAndRequeue
            }
        }
    }
}
