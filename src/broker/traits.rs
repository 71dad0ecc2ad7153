//! Broker capabilities consumed by the client runtime
//!
//! These are the only operations the client needs from a messaging library.
//! Every suspending operation takes the caller's [`CancellationContext`] and
//! must return [`BrokerError::Cancelled`] promptly once it is cancelled.
//!
//! [`BrokerError::Cancelled`]: crate::broker::BrokerError::Cancelled

use crate::broker::error::BrokerResult;
use crate::broker::types::{
    AnonymousProducerConfiguration, ConsumerConfiguration, Endpoint, Message,
    ProducerConfiguration, QueueDeclaration, RoutingType,
};
use crate::core::cancellation::CancellationContext;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Establishes connections to a broker
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoints: &[Endpoint],
        ctx: &CancellationContext,
    ) -> BrokerResult<Arc<dyn Connection>>;
}

/// An established broker connection
#[async_trait]
pub trait Connection: Send + Sync {
    async fn create_consumer(
        &self,
        configuration: &ConsumerConfiguration,
        ctx: &CancellationContext,
    ) -> BrokerResult<Arc<dyn Consumer>>;

    async fn create_producer(
        &self,
        configuration: &ProducerConfiguration,
        ctx: &CancellationContext,
    ) -> BrokerResult<Arc<dyn Producer>>;

    async fn create_anonymous_producer(
        &self,
        configuration: &AnonymousProducerConfiguration,
        ctx: &CancellationContext,
    ) -> BrokerResult<Arc<dyn AnonymousProducer>>;

    /// Open a management channel; the caller must `close()` it when done
    async fn open_topology_manager(
        &self,
        ctx: &CancellationContext,
    ) -> BrokerResult<Box<dyn TopologyManager>>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> BrokerResult<()>;
}

/// Broker-side consumer attached to a queue
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Wait for the next message
    async fn receive(&self, ctx: &CancellationContext) -> BrokerResult<Message>;

    /// Settle a received message as processed
    async fn accept(&self, message: &Message) -> BrokerResult<()>;

    /// Settle a received message as not processable; it is not redelivered
    async fn reject(&self, message: &Message) -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}

/// Producer bound to a single address
#[async_trait]
pub trait Producer: Send + Sync {
    /// Send and wait until the broker settles the message
    async fn send(&self, message: &Message, ctx: &CancellationContext) -> BrokerResult<()>;

    /// Fire-and-forget send
    fn send_nowait(&self, message: &Message) -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}

/// Producer that names the target address on every send
#[async_trait]
pub trait AnonymousProducer: Send + Sync {
    async fn send(
        &self,
        address: &str,
        routing_type: Option<RoutingType>,
        message: &Message,
        ctx: &CancellationContext,
    ) -> BrokerResult<()>;

    fn send_nowait(
        &self,
        address: &str,
        routing_type: Option<RoutingType>,
        message: &Message,
    ) -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}

/// Management channel for addresses and queues
#[async_trait]
pub trait TopologyManager: Send + Sync {
    /// Create the address or add the routing types it is missing
    async fn declare_address(
        &self,
        name: &str,
        routing_types: &BTreeSet<RoutingType>,
        ctx: &CancellationContext,
    ) -> BrokerResult<()>;

    async fn list_queue_names(&self, ctx: &CancellationContext) -> BrokerResult<Vec<String>>;

    /// Create a queue; fails with `QueueExists` if it is already present
    async fn create_queue(
        &self,
        declaration: &QueueDeclaration,
        ctx: &CancellationContext,
    ) -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}
