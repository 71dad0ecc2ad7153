//! Broker Error Types

use crate::broker::RoutingType;
use crate::core::cancellation::Cancelled;
use crate::core::lazy::InitAborted;

/// Errors reported by broker capabilities
///
/// `Clone` so that a memoized failure (e.g. of the shared connection) can be
/// handed verbatim to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("No endpoints configured")]
    NoEndpoints,

    #[error("Connection to {endpoint} failed: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    #[error("{resource} is closed")]
    Closed { resource: String },

    #[error("Address '{address}' does not exist")]
    AddressNotFound { address: String },

    #[error("Address '{address}' does not support routing type {routing_type}")]
    RoutingTypeNotSupported {
        address: String,
        routing_type: RoutingType,
    },

    #[error("Queue '{queue}' does not exist")]
    QueueNotFound { queue: String },

    #[error("Queue '{queue}' already exists")]
    QueueExists { queue: String },

    #[error("Queue '{queue}' has reached its limit of {max_consumers} consumers")]
    MaxConsumersReached { queue: String, max_consumers: i32 },

    #[error("Invalid filter expression '{expression}': {message}")]
    InvalidFilter { expression: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal broker error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// True when the error is the normal shutdown signal rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BrokerError::Cancelled)
    }

    pub fn closed(resource: impl Into<String>) -> Self {
        BrokerError::Closed {
            resource: resource.into(),
        }
    }
}

impl From<Cancelled> for BrokerError {
    fn from(_: Cancelled) -> Self {
        BrokerError::Cancelled
    }
}

impl From<InitAborted> for BrokerError {
    fn from(aborted: InitAborted) -> Self {
        BrokerError::Internal(aborted.to_string())
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
