use std::fmt;
use tokio::sync::watch;

// ============================================================================
// Delivery Types
// ============================================================================

/// Result of a single delivery attempt against the downstream sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    /// Sink accepted the payload (2xx)
    Success,
    /// Sink rejected the payload (4xx) - retrying cannot help
    PermanentFailure,
    /// No response, 5xx, or an unexpected status - may recover on retry
    TransientFailure,
}

impl DeliveryOutcome {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Success => "success",
            DeliveryOutcome::PermanentFailure => "permanent_failure",
            DeliveryOutcome::TransientFailure => "transient_failure",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal signal for one queue message, applied by the consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckDecision {
    /// Remove from the queue, processing complete
    Acknowledge,
    /// Return to the queue for later redelivery
    RejectAndRequeue,
    /// Drop without redelivery. Only used for malformed payloads.
    RejectDiscard,
}

impl AckDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckDecision::Acknowledge => "acknowledge",
            AckDecision::RejectAndRequeue => "reject_requeue",
            AckDecision::RejectDiscard => "reject_discard",
        }
    }
}

impl fmt::Display for AckDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Shutdown Signalling
// ============================================================================

/// Owner side of the worker's shutdown signal
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Create a receiver that observes this shutdown
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal { rx: self.tx.subscribe() }
    }

    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable observer of a [`Shutdown`]
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires, for callers without a shutdown path
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered.
    ///
    /// If the owning [`Shutdown`] is dropped without triggering, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_labels() {
        assert_eq!(AckDecision::RejectDiscard.to_string(), "reject_discard");
        assert_eq!(DeliveryOutcome::PermanentFailure.to_string(), "permanent_failure");
    }

    #[tokio::test]
    async fn test_signal_resolves_after_trigger() {
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal did not resolve")
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_signal_created_after_trigger_is_already_cancelled() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let signal = shutdown.signal();
        drop(shutdown);

        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already-triggered signal should resolve immediately");
    }

    #[tokio::test]
    async fn test_never_signal_stays_pending() {
        let signal = ShutdownSignal::never();
        let res = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(res.is_err());
    }
}
