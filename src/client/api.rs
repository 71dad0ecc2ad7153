//! Public API of the client runtime
//!
//! External modules should import from here rather than from the individual
//! submodules.

// Building and running a client
pub use crate::client::builder::{ClientBuilder, ConnectionBuilder};
pub use crate::client::orchestrator::ClientOrchestrator;
pub use crate::client::runtime::Client;

// Connections and topology
pub use crate::client::connection::{ConnectionHandle, ConnectionProvider};
pub use crate::client::topology::{TopologyReconciler, TopologyRegistry, TopologyReport};

// Consumers
pub use crate::client::consumer::{
    handler, ConsumerContext, ConsumerRuntime, ConsumerState, HandlerError, HandlerResult,
    MessageHandler,
};
pub use crate::client::options::{ConsumerOptions, QueueOptions};
pub use crate::client::services::Services;

// Producers
pub use crate::client::producer::{
    AnonymousProducerHandle, ProducerHandle, ProducerInitializer, TypedAnonymousProducer,
    TypedProducer,
};

// Observation hooks
pub use crate::client::observers::{MessageContext, Observers, ReceiveObserver, SendObserver};

// Error handling
pub use crate::client::error::{ClientError, ProducerError};
