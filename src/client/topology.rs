//! Topology declaration and reconciliation
//!
//! Registrations describe the addresses and queues a connection needs. Before
//! any consumer starts, the reconciler makes sure they exist:
//!
//! ```text
//! TopologyRegistry ── merged per connection ──► TopologyReconciler::reconcile
//!                                                 │
//!                     nothing declared? ──────────┤── skip, no connection
//!                                                 ▼
//!                         open manager ─► declare addresses (union of types)
//!                                      ─► list queues ─► create missing ones
//!                                      ─► close manager (always)
//! ```
//!
//! Reconciliation is create-only. Existing queues are never altered, so running
//! it any number of times leaves the broker in the same state.

use crate::broker::{BrokerError, BrokerResult, QueueDeclaration, RoutingType, TopologyManager};
use crate::client::connection::ConnectionHandle;
use crate::core::cancellation::CancellationContext;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Desired addresses and queues of one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyRegistry {
    addresses: BTreeMap<String, BTreeSet<RoutingType>>,
    queues: Vec<QueueDeclaration>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register routing types for an address, merged with earlier registrations
    pub fn add_address(
        &mut self,
        name: impl Into<String>,
        routing_types: impl IntoIterator<Item = RoutingType>,
    ) {
        self.addresses
            .entry(name.into())
            .or_default()
            .extend(routing_types);
    }

    /// Register a queue; the first declaration of a name wins
    pub fn add_queue(&mut self, declaration: QueueDeclaration) {
        match self.queues.iter().find(|q| q.name == declaration.name) {
            Some(existing) if *existing != declaration => {
                log::warn!(
                    "Queue '{}' declared more than once with different settings; keeping the first",
                    declaration.name
                );
            }
            Some(_) => {}
            None => self.queues.push(declaration),
        }
    }

    pub fn addresses(&self) -> &BTreeMap<String, BTreeSet<RoutingType>> {
        &self.addresses
    }

    pub fn queues(&self) -> &[QueueDeclaration] {
        &self.queues
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.queues.is_empty()
    }
}

/// What one reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyReport {
    /// True when there was nothing to declare and no connection was used
    pub skipped: bool,
    pub addresses_declared: Vec<String>,
    pub queues_created: Vec<String>,
    pub queues_existing: Vec<String>,
}

/// Brings one connection's broker topology in line with its registry
#[derive(Debug, Clone)]
pub struct TopologyReconciler {
    connection: ConnectionHandle,
    registry: TopologyRegistry,
    declare_addresses: bool,
    declare_queues: bool,
}

impl TopologyReconciler {
    pub fn new(
        connection: ConnectionHandle,
        registry: TopologyRegistry,
        declare_addresses: bool,
        declare_queues: bool,
    ) -> Self {
        Self {
            connection,
            registry,
            declare_addresses,
            declare_queues,
        }
    }

    pub fn connection_name(&self) -> &str {
        self.connection.name()
    }

    fn addresses(&self) -> impl Iterator<Item = (&String, &BTreeSet<RoutingType>)> {
        self.registry
            .addresses
            .iter()
            .filter(|_| self.declare_addresses)
    }

    fn queues(&self) -> &[QueueDeclaration] {
        if self.declare_queues {
            &self.registry.queues
        } else {
            &[]
        }
    }

    pub fn has_work(&self) -> bool {
        self.addresses().next().is_some() || !self.queues().is_empty()
    }

    pub async fn reconcile(&self, ctx: &CancellationContext) -> BrokerResult<TopologyReport> {
        if !self.has_work() {
            log::debug!(
                "Connection '{}': no topology declared, skipping",
                self.connection.name()
            );
            return Ok(TopologyReport {
                skipped: true,
                ..TopologyReport::default()
            });
        }

        let connection = self.connection.get(ctx).await?;
        let manager = connection.open_topology_manager(ctx).await?;

        let result = self.apply(manager.as_ref(), ctx).await;

        if let Err(e) = manager.close().await {
            log::warn!(
                "Connection '{}': failed to close topology manager: {}",
                self.connection.name(),
                e
            );
        }

        let report = result?;
        log::info!(
            "Connection '{}': topology ready ({} address(es), {} queue(s) created, {} already present)",
            self.connection.name(),
            report.addresses_declared.len(),
            report.queues_created.len(),
            report.queues_existing.len()
        );
        Ok(report)
    }

    async fn apply(
        &self,
        manager: &dyn TopologyManager,
        ctx: &CancellationContext,
    ) -> BrokerResult<TopologyReport> {
        let mut report = TopologyReport::default();

        for (address, routing_types) in self.addresses() {
            manager.declare_address(address, routing_types, ctx).await?;
            log::debug!("Declared address '{}' with {:?}", address, routing_types);
            report.addresses_declared.push(address.clone());
        }

        if self.queues().is_empty() {
            return Ok(report);
        }

        let existing: HashSet<String> = manager.list_queue_names(ctx).await?.into_iter().collect();

        for declaration in self.queues() {
            if existing.contains(&declaration.name) {
                report.queues_existing.push(declaration.name.clone());
                continue;
            }
            match manager.create_queue(declaration, ctx).await {
                Ok(()) => {
                    log::debug!(
                        "Created queue '{}' on address '{}'",
                        declaration.name,
                        declaration.address
                    );
                    report.queues_created.push(declaration.name.clone());
                }
                // Created by someone else since the listing
                Err(BrokerError::QueueExists { .. }) => {
                    report.queues_existing.push(declaration.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}
