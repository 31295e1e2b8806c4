//! Queue collaborator for the weather bridge
//!
//! Provides the consumer-side abstraction the router drains messages from:
//! - QueueConsumer: yields deliveries one at a time
//! - QueuedDelivery: body bytes plus an acknowledgment handle, settled exactly once
//! - MemoryQueue: in-process queue recording every settlement
//! - AmqpConsumer (feature `amqp`): durable RabbitMQ queue with manual ack and prefetch=1

use std::fmt;
use async_trait::async_trait;
use wb_common::AckDecision;

pub mod memory;
#[cfg(feature = "amqp")]
pub mod amqp;

pub use memory::{MemoryQueue, MemoryConsumer, Settlement};
#[cfg(feature = "amqp")]
pub use amqp::{AmqpConsumer, AmqpConfig};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Consume error: {0}")]
    Consume(String),

    #[error("Acknowledgment error: {0}")]
    Ack(String),

    #[error("Consumer stopped")]
    Stopped,

    #[cfg(feature = "amqp")]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Broker-side operations for settling one delivery
#[async_trait]
pub trait AckHandle: Send + Sync {
    /// Remove the message from the queue
    async fn acknowledge(&self) -> Result<()>;

    /// Return the message to the queue for redelivery
    async fn reject_requeue(&self) -> Result<()>;

    /// Drop the message without redelivery
    async fn reject_discard(&self) -> Result<()>;
}

/// A message received from the queue, awaiting settlement
pub struct QueuedDelivery {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    handle: Box<dyn AckHandle>,
}

impl QueuedDelivery {
    pub fn new(body: Vec<u8>, delivery_tag: u64, redelivered: bool, handle: Box<dyn AckHandle>) -> Self {
        Self {
            body,
            delivery_tag,
            redelivered,
            handle,
        }
    }

    /// Apply the decision to the broker. Consumes the delivery so it cannot be settled twice.
    pub async fn settle(self, decision: AckDecision) -> Result<()> {
        match decision {
            AckDecision::Acknowledge => self.handle.acknowledge().await,
            AckDecision::RejectAndRequeue => self.handle.reject_requeue().await,
            AckDecision::RejectDiscard => self.handle.reject_discard().await,
        }
    }
}

impl fmt::Debug for QueuedDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedDelivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Source of deliveries for the consumer loop
#[async_trait]
pub trait QueueConsumer: Send {
    /// Identifier used in logs
    fn identifier(&self) -> &str;

    /// Wait for the next delivery. `Ok(None)` means the source is exhausted.
    async fn next_delivery(&mut self) -> Result<Option<QueuedDelivery>>;

    /// Stop accepting deliveries. Unsettled prefetched messages return to the broker.
    async fn stop(&mut self) -> Result<()>;
}
