//! Bridge metrics, recorded through the `metrics` facade.
//!
//! Nothing is exported unless the binary installs a recorder.

use std::time::Duration;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use wb_common::{AckDecision, DeliveryOutcome};

pub const MESSAGES_RECEIVED: &str = "bridge_messages_received_total";
pub const MESSAGES_DECIDED: &str = "bridge_messages_total";
pub const DELIVERY_ATTEMPTS: &str = "bridge_delivery_attempts_total";
pub const ACK_ERRORS: &str = "bridge_ack_errors_total";
pub const MESSAGE_DURATION: &str = "bridge_message_duration_seconds";

/// Register descriptions with the installed recorder
pub fn describe() {
    describe_counter!(MESSAGES_RECEIVED, Unit::Count, "Messages received from the queue");
    describe_counter!(MESSAGES_DECIDED, Unit::Count, "Messages by acknowledgment decision");
    describe_counter!(DELIVERY_ATTEMPTS, Unit::Count, "Delivery attempts by outcome");
    describe_counter!(ACK_ERRORS, Unit::Count, "Failures to settle a message with the broker");
    describe_histogram!(MESSAGE_DURATION, Unit::Seconds, "Time to process one message");
}

pub fn record_received() {
    counter!(MESSAGES_RECEIVED).increment(1);
}

pub fn record_attempt(outcome: DeliveryOutcome) {
    counter!(DELIVERY_ATTEMPTS, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_decision(decision: AckDecision, elapsed: Duration) {
    counter!(MESSAGES_DECIDED, "decision" => decision.as_str()).increment(1);
    histogram!(MESSAGE_DURATION).record(elapsed.as_secs_f64());
}

pub fn record_ack_error() {
    counter!(ACK_ERRORS).increment(1);
}
