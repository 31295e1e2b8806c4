//! In-process queue
//!
//! Behaves like a prefetch=1 broker queue for a single consumer. Every settlement
//! is recorded; requeued messages are parked until `redeliver_requeued` is called
//! so callers control when redelivery happens.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use wb_common::AckDecision;

use crate::{AckHandle, QueueConsumer, QueueError, QueuedDelivery, Result};

/// A settled delivery as observed by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub decision: AckDecision,
}

struct Pending {
    body: Vec<u8>,
    redelivered: bool,
}

struct State {
    tx: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Pending>>>,
    settlements: Mutex<Vec<Settlement>>,
    requeued: Mutex<Vec<Vec<u8>>>,
    next_tag: AtomicU64,
}

/// Producer/inspection side of the in-process queue
#[derive(Clone)]
pub struct MemoryQueue {
    name: String,
    state: Arc<State>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            state: Arc::new(State {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                settlements: Mutex::new(Vec::new()),
                requeued: Mutex::new(Vec::new()),
                next_tag: AtomicU64::new(1),
            }),
        }
    }

    /// Enqueue a message body
    pub fn publish(&self, body: impl Into<Vec<u8>>) -> Result<()> {
        self.push(Pending { body: body.into(), redelivered: false })
    }

    fn push(&self, pending: Pending) -> Result<()> {
        let tx = self.state.tx.lock();
        match tx.as_ref() {
            Some(tx) => tx.send(pending).map_err(|_| QueueError::Stopped),
            None => Err(QueueError::Stopped),
        }
    }

    /// Close the producer side; the consumer drains what is left and then ends
    pub fn close(&self) {
        self.state.tx.lock().take();
    }

    /// Take the single consumer for this queue
    pub fn consumer(&self) -> Result<MemoryConsumer> {
        let rx = self.state.rx.lock().take().ok_or_else(|| {
            QueueError::Consume(format!("queue '{}' already has a consumer", self.name))
        })?;
        Ok(MemoryConsumer {
            identifier: format!("memory:{}", self.name),
            rx,
            state: self.state.clone(),
            stopped: false,
        })
    }

    /// All settlements so far, in settlement order
    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.settlements.lock().clone()
    }

    pub fn settled_count(&self) -> usize {
        self.state.settlements.lock().len()
    }

    /// Move requeued messages back onto the queue, flagged as redelivered.
    /// Returns how many were redelivered.
    pub fn redeliver_requeued(&self) -> Result<usize> {
        let parked: Vec<Vec<u8>> = std::mem::take(&mut *self.state.requeued.lock());
        let count = parked.len();
        for body in parked {
            self.push(Pending { body, redelivered: true })?;
        }
        Ok(count)
    }
}

/// Consumer side of a [`MemoryQueue`]
pub struct MemoryConsumer {
    identifier: String,
    rx: mpsc::UnboundedReceiver<Pending>,
    state: Arc<State>,
    stopped: bool,
}

#[async_trait]
impl QueueConsumer for MemoryConsumer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn next_delivery(&mut self) -> Result<Option<QueuedDelivery>> {
        if self.stopped {
            return Ok(None);
        }

        let Some(pending) = self.rx.recv().await else {
            return Ok(None);
        };

        let delivery_tag = self.state.next_tag.fetch_add(1, Ordering::SeqCst);
        let handle = MemoryAckHandle {
            delivery_tag,
            body: pending.body.clone(),
            state: self.state.clone(),
        };

        Ok(Some(QueuedDelivery::new(
            pending.body,
            delivery_tag,
            pending.redelivered,
            Box::new(handle),
        )))
    }

    async fn stop(&mut self) -> Result<()> {
        debug!(consumer = %self.identifier, "Stopping memory consumer");
        self.stopped = true;
        self.rx.close();
        Ok(())
    }
}

struct MemoryAckHandle {
    delivery_tag: u64,
    body: Vec<u8>,
    state: Arc<State>,
}

impl MemoryAckHandle {
    fn record(&self, decision: AckDecision) {
        self.state.settlements.lock().push(Settlement {
            delivery_tag: self.delivery_tag,
            body: self.body.clone(),
            decision,
        });
    }
}

#[async_trait]
impl AckHandle for MemoryAckHandle {
    async fn acknowledge(&self) -> Result<()> {
        self.record(AckDecision::Acknowledge);
        Ok(())
    }

    async fn reject_requeue(&self) -> Result<()> {
        self.record(AckDecision::RejectAndRequeue);
        self.state.requeued.lock().push(self.body.clone());
        Ok(())
    }

    async fn reject_discard(&self) -> Result<()> {
        self.record(AckDecision::RejectDiscard);
        Ok(())
    }
}
