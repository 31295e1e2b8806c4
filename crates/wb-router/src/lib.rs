//! Weather Bridge Router
//!
//! Drains measurement messages from the queue and forwards them to the HTTP sink:
//! - validator: minimal required-field schema check
//! - Mediator / HttpMediator: single delivery attempt with outcome classification
//! - RetryCoordinator: sequential attempts with exponential backoff and a fixed ceiling
//! - MessageProcessor: validation -> delivery -> acknowledgment decision
//! - ConsumerLoop: applies decisions to queue deliveries and honours shutdown
//! - WorkerConfig: environment-driven configuration

pub mod config;
pub mod consumer;
pub mod error;
pub mod mediator;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod validator;

pub use config::{ConfigError, WorkerConfig};
pub use consumer::{ConsumerLoop, LoopStats};
pub use error::RouterError;
pub use mediator::{classify_status, HttpMediator, HttpMediatorConfig, Mediator};
pub use processor::MessageProcessor;
pub use retry::{DeliveryReport, RetryCoordinator, RetryPolicy, RetryState};
pub use validator::{validate, FieldPresence, ValidationError};

pub type Result<T> = std::result::Result<T, RouterError>;
