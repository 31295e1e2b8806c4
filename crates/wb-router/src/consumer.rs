//! Consumer loop - feeds queue deliveries through the processor one at a time
//!
//! Each delivery is processed to completion and settled before the next one is
//! requested, which together with the broker's prefetch of one keeps a single
//! message in flight. On shutdown the loop stops requesting deliveries; a message
//! already being processed finishes (or ends at its next backoff) and is settled.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wb_common::{AckDecision, ShutdownSignal};
use wb_queue::{QueueConsumer, QueueError, QueuedDelivery};

use crate::error::RouterError;
use crate::metrics;
use crate::processor::MessageProcessor;

const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Counters for one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub received: u64,
    pub acknowledged: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub ack_errors: u64,
}

impl LoopStats {
    fn record(&mut self, decision: AckDecision) {
        match decision {
            AckDecision::Acknowledge => self.acknowledged += 1,
            AckDecision::RejectAndRequeue => self.requeued += 1,
            AckDecision::RejectDiscard => self.discarded += 1,
        }
    }
}

pub struct ConsumerLoop {
    consumer: Box<dyn QueueConsumer>,
    processor: Arc<MessageProcessor>,
    shutdown: ShutdownSignal,
}

impl ConsumerLoop {
    pub fn new(
        consumer: Box<dyn QueueConsumer>,
        processor: Arc<MessageProcessor>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            consumer,
            processor,
            shutdown,
        }
    }

    /// Run until shutdown.
    ///
    /// Returns an error if the delivery stream ends before shutdown was requested
    /// or after repeated consume failures.
    pub async fn run(mut self) -> Result<LoopStats, RouterError> {
        let mut stats = LoopStats::default();
        let mut consecutive_errors = 0u32;
        let consumer_id = self.consumer.identifier().to_string();

        info!(consumer = %consumer_id, "Consumer loop started");

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(consumer = %consumer_id, operation = "shutdown", "Shutdown requested, no longer accepting messages");
                    break Ok(());
                }
                next = self.consumer.next_delivery() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    consecutive_errors = 0;
                    Self::handle(&self.processor, delivery, &mut stats).await;
                }
                Ok(None) if self.shutdown.is_triggered() => {
                    info!(consumer = %consumer_id, "Queue closed during shutdown");
                    break Ok(());
                }
                Ok(None) => {
                    error!(consumer = %consumer_id, "Delivery stream ended unexpectedly");
                    break Err(RouterError::Queue(QueueError::Stopped));
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        consumer = %consumer_id,
                        error = %e,
                        consecutive_errors,
                        "Error receiving message"
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        break Err(RouterError::Queue(e));
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_PAUSE) => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                }
            }
        };

        if let Err(e) = self.consumer.stop().await {
            warn!(consumer = %consumer_id, error = %e, "Failed to stop consumer cleanly");
        }

        info!(
            consumer = %consumer_id,
            received = stats.received,
            acknowledged = stats.acknowledged,
            requeued = stats.requeued,
            discarded = stats.discarded,
            ack_errors = stats.ack_errors,
            "Consumer loop stopped"
        );

        result.map(|()| stats)
    }

    async fn handle(processor: &MessageProcessor, delivery: QueuedDelivery, stats: &mut LoopStats) {
        let delivery_tag = delivery.delivery_tag;
        stats.received += 1;
        metrics::record_received();

        info!(
            operation = "process_message",
            message_size = delivery.body.len(),
            delivery_tag,
            redelivered = delivery.redelivered,
            "Received message"
        );

        let decision = processor.process(&delivery.body).await;
        stats.record(decision);

        match delivery.settle(decision).await {
            Ok(()) => match decision {
                AckDecision::Acknowledge => {
                    info!(operation = "ack_message", delivery_tag, "Message acknowledged successfully");
                }
                AckDecision::RejectAndRequeue => {
                    warn!(operation = "nack_message", delivery_tag, "Message nacked and requeued");
                }
                AckDecision::RejectDiscard => {
                    warn!(operation = "nack_message", delivery_tag, "Message rejected and discarded");
                }
            },
            Err(e) => {
                // Not retried: the broker redelivers unsettled messages once the channel closes
                stats.ack_errors += 1;
                metrics::record_ack_error();
                error!(
                    operation = "settle_message",
                    delivery_tag,
                    decision = %decision,
                    error = %e,
                    "Failed to settle message"
                );
            }
        }

        debug!(delivery_tag, "Delivery handled");
    }
}
