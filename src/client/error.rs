//! Client Error Types

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::core::cancellation::Cancelled;
use crate::core::error_handling::ContextualError;

/// Outcome of producer lifecycle calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerError {
    #[error("Producer '{producer}' has already been initialized")]
    AlreadyInitialized { producer: String },

    #[error("Producer '{producer}' has not been initialized")]
    Uninitialized { producer: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ProducerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProducerError::Broker(e) if e.is_cancelled())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection '{connection}' failed: {source}")]
    Connection {
        connection: String,
        #[source]
        source: BrokerError,
    },

    #[error("Topology declaration on connection '{connection}' failed: {source}")]
    Topology {
        connection: String,
        #[source]
        source: BrokerError,
    },

    #[error("Producer startup failed: {0}")]
    Producer(#[source] ProducerError),

    #[error("Consumer {consumer} failed to start: {source}")]
    ConsumerStart {
        consumer: String,
        #[source]
        source: BrokerError,
    },

    #[error(
        "Producer type '{type_name}' is already registered; typed producers must be unique"
    )]
    DuplicateProducer { type_name: &'static str },

    #[error("Connection '{name}' is already registered")]
    DuplicateConnection { name: String },

    #[error("Connection '{name}' is not registered")]
    UnknownConnection { name: String },

    #[error("Invalid registration: {message}")]
    InvalidRegistration { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }

    pub(crate) fn connection(name: &str, source: BrokerError) -> Self {
        if source.is_cancelled() {
            return ClientError::Cancelled;
        }
        ClientError::Connection {
            connection: name.to_string(),
            source,
        }
    }

    pub(crate) fn topology(name: &str, source: BrokerError) -> Self {
        if source.is_cancelled() {
            return ClientError::Cancelled;
        }
        ClientError::Topology {
            connection: name.to_string(),
            source,
        }
    }

    pub(crate) fn consumer_start(consumer: &str, source: BrokerError) -> Self {
        if source.is_cancelled() {
            return ClientError::Cancelled;
        }
        ClientError::ConsumerStart {
            consumer: consumer.to_string(),
            source,
        }
    }
}

impl From<ProducerError> for ClientError {
    fn from(error: ProducerError) -> Self {
        if error.is_cancelled() {
            ClientError::Cancelled
        } else {
            ClientError::Producer(error)
        }
    }
}

impl From<Cancelled> for ClientError {
    fn from(_: Cancelled) -> Self {
        ClientError::Cancelled
    }
}

impl ContextualError for ClientError {
    fn is_user_actionable(&self) -> bool {
        match self {
            ClientError::DuplicateProducer { .. }
            | ClientError::DuplicateConnection { .. }
            | ClientError::UnknownConnection { .. }
            | ClientError::InvalidRegistration { .. } => true,
            ClientError::Config(e) => e.is_user_actionable(),
            _ => false,
        }
    }

    fn user_message(&self) -> Option<String> {
        match self {
            ClientError::InvalidRegistration { message } => Some(message.clone()),
            ClientError::Config(e) => e.user_message(),
            _ if self.is_user_actionable() => Some(self.to_string()),
            _ => None,
        }
    }
}
