//! In-process broker implementing every capability in [`crate::broker`]
//!
//! Used by the host binary for local runs and by the test suites. It models
//! the parts of broker behaviour the client runtime depends on:
//!
//! ```text
//!              ┌──────────── address "orders" {anycast, multicast} ────────────┐
//! producer ──► │  anycast:   round-robin over bound anycast queues             │
//!              │  multicast: copy to every bound multicast queue               │
//!              └──────┬───────────────────────┬────────────────────────────────┘
//!                     ▼                       ▼
//!              queue "orders"          queue "orders.subscription-1"
//!              (competing consumers)   (private, removed on close)
//! ```
//!
//! Queue filters are applied when routing; consumer filters and the no-local
//! flag are applied when a consumer takes from its queue. Credit, exclusivity
//! and group settings are recorded but do not change delivery.

mod connection;
mod endpoints;
mod filter;
mod queue;
mod state;
mod topology;


pub use connection::{InMemoryConnection, InMemoryConnector};
pub use state::BrokerSettings;

use crate::broker::types::{Endpoint, QueueDeclaration, RoutingType};
use state::BrokerState;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Handle onto an in-memory broker; clones share the same broker
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_settings(BrokerSettings::default())
    }

    pub fn with_settings(settings: BrokerSettings) -> Self {
        Self {
            state: Arc::new(BrokerState::new(settings)),
        }
    }

    /// Listen on `endpoint` instead of `localhost:5672`
    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        Self::with_settings(BrokerSettings {
            endpoint,
            ..BrokerSettings::default()
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.state.settings.endpoint
    }

    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector::new(Arc::clone(&self.state))
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.state
            .pending_connect_failures
            .store(count, Ordering::Release);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::Acquire)
    }

    /// Topology managers opened and not yet closed
    pub fn open_topology_managers(&self) -> usize {
        self.state.open_topology_managers.load(Ordering::Acquire)
    }

    /// Number of durable queues ever created
    pub fn queues_created(&self) -> usize {
        self.state.queues_created.load(Ordering::Acquire)
    }

    pub fn address_routing_types(&self, address: &str) -> Option<BTreeSet<RoutingType>> {
        self.state.address_routing_types(address)
    }

    /// Names of all queues, including private subscription queues
    pub fn queue_names(&self) -> Vec<String> {
        self.state.queue_names(true)
    }

    pub fn queue_declaration(&self, queue: &str) -> Option<QueueDeclaration> {
        self.state.queue(queue).map(|q| q.declaration().clone())
    }

    /// Messages waiting in `queue`; `None` if it does not exist
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state.queue(queue).map(|q| q.depth())
    }

    pub fn queue_consumer_count(&self, queue: &str) -> Option<usize> {
        self.state.queue(queue).map(|q| q.consumer_count())
    }

    pub fn accepted_count(&self, queue: &str) -> Option<u64> {
        self.state.queue(queue).map(|q| q.accepted())
    }

    pub fn rejected_count(&self, queue: &str) -> Option<u64> {
        self.state.queue(queue).map(|q| q.rejected())
    }
}
