//! Minimal schema check for measurement payloads.

use serde_json::{Map, Value};
use tracing::warn;

/// Which required fields were present with the right type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldPresence {
    pub timestamp: bool,
    pub temperature: bool,
    pub humidity: bool,
}

impl FieldPresence {
    fn inspect(object: &Map<String, Value>) -> Self {
        Self {
            timestamp: object.get("timestamp").is_some_and(Value::is_string),
            temperature: object.get("temperature").is_some_and(Value::is_number),
            humidity: object.get("humidity").is_some_and(Value::is_number),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.timestamp && self.temperature && self.humidity
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload is missing required fields: {0:?}")]
    MissingFields(FieldPresence),
}

/// Check a raw payload, reporting why it is malformed.
pub fn check(payload: &[u8]) -> Result<(), ValidationError> {
    let value: Value = serde_json::from_slice(payload)?;
    let Value::Object(object) = value else {
        return Err(ValidationError::NotAnObject);
    };

    let presence = FieldPresence::inspect(&object);
    if presence.is_complete() {
        Ok(())
    } else {
        Err(ValidationError::MissingFields(presence))
    }
}

/// True iff the payload is a JSON object with a string `timestamp` and numeric
/// `temperature` and `humidity`. Fails closed.
pub fn validate(payload: &[u8]) -> bool {
    match check(payload) {
        Ok(()) => true,
        Err(ValidationError::MissingFields(presence)) => {
            warn!(
                operation = "validate_json",
                has_timestamp = presence.timestamp,
                has_temperature = presence.temperature,
                has_humidity = presence.humidity,
                "Missing required fields"
            );
            false
        }
        Err(e) => {
            warn!(operation = "validate_json", error = %e, "Invalid JSON payload");
            false
        }
    }
}
