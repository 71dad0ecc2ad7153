//! Broker capabilities and the in-memory broker
//!
//! The client runtime never talks to a wire protocol directly. It consumes
//! the traits in this module:
//!
//! ```text
//! Connector ──connect──► Connection ──┬── create_consumer ───────► Consumer
//!                                     ├── create_producer ───────► Producer
//!                                     ├── create_anonymous_... ──► AnonymousProducer
//!                                     └── open_topology_manager ─► TopologyManager
//! ```
//!
//! [`memory`] provides an in-process implementation of all of them.

mod error;
mod traits;
mod types;

pub mod memory;

pub use error::{BrokerError, BrokerResult};
pub use traits::{AnonymousProducer, Connection, Connector, Consumer, Producer, TopologyManager};
pub use types::{
    AnonymousProducerConfiguration, ConsumerConfiguration, DurabilityMode, Endpoint, Message,
    MessageIdPolicy, ProducerConfiguration, ProducerOptions, QueueDeclaration, RoutingType,
};
