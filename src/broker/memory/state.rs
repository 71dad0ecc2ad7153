//! Shared broker state: addresses, queues and routing

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::queue::{Delivery, MemoryQueue};
use crate::broker::types::{ConsumerConfiguration, Endpoint, Message, QueueDeclaration, RoutingType};
use crate::core::sync::lock_recovering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Behaviour switches of an [`InMemoryBroker`](super::InMemoryBroker)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// The only endpoint connections succeed against
    pub endpoint: Endpoint,
    /// Create unknown addresses on send or consumer attach
    pub auto_create_addresses: bool,
    /// Create unknown named queues on consumer attach
    pub auto_create_queues: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new("localhost", 5672),
            auto_create_addresses: true,
            auto_create_queues: true,
        }
    }
}

#[derive(Debug, Default)]
struct AddressState {
    routing_types: BTreeSet<RoutingType>,
    /// Bound queue names in creation order
    bindings: Vec<String>,
    anycast_cursor: usize,
}

#[derive(Debug, Default)]
struct Topology {
    addresses: HashMap<String, AddressState>,
    queues: HashMap<String, Arc<MemoryQueue>>,
}

#[derive(Debug)]
pub(crate) struct BrokerState {
    pub settings: BrokerSettings,
    topology: Mutex<Topology>,
    next_delivery_tag: AtomicU64,
    next_connection_id: AtomicU64,
    next_subscription_id: AtomicU64,
    pub connect_attempts: AtomicUsize,
    pub pending_connect_failures: AtomicUsize,
    pub open_topology_managers: AtomicUsize,
    pub queues_created: AtomicUsize,
}

impl BrokerState {
    pub(crate) fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            topology: Mutex::new(Topology::default()),
            next_delivery_tag: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
            next_subscription_id: AtomicU64::new(1),
            connect_attempts: AtomicUsize::new(0),
            pending_connect_failures: AtomicUsize::new(0),
            open_topology_managers: AtomicUsize::new(0),
            queues_created: AtomicUsize::new(0),
        }
    }

    pub(crate) fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create the address or extend its routing types
    pub(crate) fn declare_address(&self, name: &str, routing_types: &BTreeSet<RoutingType>) {
        let mut topology = lock_recovering(&self.topology);
        let address = topology.addresses.entry(name.to_string()).or_default();
        let added: Vec<_> = routing_types
            .iter()
            .filter(|rt| address.routing_types.insert(**rt))
            .collect();
        if !added.is_empty() {
            log::debug!("Address '{}' now supports {:?}", name, address.routing_types);
        }
    }

    pub(crate) fn create_queue(
        &self,
        declaration: &QueueDeclaration,
        temporary: bool,
    ) -> BrokerResult<Arc<MemoryQueue>> {
        let mut topology = lock_recovering(&self.topology);
        self.create_queue_locked(&mut topology, declaration, temporary)
    }

    fn create_queue_locked(
        &self,
        topology: &mut Topology,
        declaration: &QueueDeclaration,
        temporary: bool,
    ) -> BrokerResult<Arc<MemoryQueue>> {
        if topology.queues.contains_key(&declaration.name) {
            return Err(BrokerError::QueueExists {
                queue: declaration.name.clone(),
            });
        }

        let queue = Arc::new(MemoryQueue::new(declaration.clone(), temporary)?);

        let address = match topology.addresses.get_mut(&declaration.address) {
            Some(address) => address,
            None if declaration.auto_create_address || temporary => topology
                .addresses
                .entry(declaration.address.clone())
                .or_default(),
            None => {
                return Err(BrokerError::AddressNotFound {
                    address: declaration.address.clone(),
                });
            }
        };

        if !address.routing_types.contains(&declaration.routing_type) {
            if declaration.auto_create_address || temporary || address.routing_types.is_empty() {
                address.routing_types.insert(declaration.routing_type);
            } else {
                return Err(BrokerError::RoutingTypeNotSupported {
                    address: declaration.address.clone(),
                    routing_type: declaration.routing_type,
                });
            }
        }

        address.bindings.push(declaration.name.clone());
        topology
            .queues
            .insert(declaration.name.clone(), Arc::clone(&queue));

        if !temporary {
            self.queues_created.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "Created queue '{}' on {} address '{}'",
                declaration.name,
                declaration.routing_type,
                declaration.address
            );
        }
        Ok(queue)
    }

    pub(crate) fn delete_queue(&self, name: &str) {
        let mut topology = lock_recovering(&self.topology);
        let Some(queue) = topology.queues.remove(name) else {
            return;
        };
        if let Some(address) = topology.addresses.get_mut(&queue.declaration().address) {
            address.bindings.retain(|bound| bound != name);
        }
    }

    pub(crate) fn queue(&self, name: &str) -> Option<Arc<MemoryQueue>> {
        lock_recovering(&self.topology).queues.get(name).cloned()
    }

    pub(crate) fn queue_names(&self, include_temporary: bool) -> Vec<String> {
        let topology = lock_recovering(&self.topology);
        let mut names: Vec<_> = topology
            .queues
            .values()
            .filter(|queue| include_temporary || !queue.is_temporary())
            .map(|queue| queue.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn address_routing_types(&self, name: &str) -> Option<BTreeSet<RoutingType>> {
        lock_recovering(&self.topology)
            .addresses
            .get(name)
            .map(|address| address.routing_types.clone())
    }

    /// Find or create the queue a consumer attaches to
    ///
    /// * named queue: must exist unless queues are auto-created
    /// * multicast without a queue: a private subscription queue
    /// * anycast without a queue: the queue named after the address
    pub(crate) fn resolve_consumer_queue(
        &self,
        configuration: &ConsumerConfiguration,
    ) -> BrokerResult<Arc<MemoryQueue>> {
        let mut topology = lock_recovering(&self.topology);
        let routing_type = configuration.routing_type.unwrap_or(RoutingType::Anycast);

        if let Some(name) = &configuration.queue {
            if let Some(queue) = topology.queues.get(name) {
                return Ok(Arc::clone(queue));
            }
            if !self.settings.auto_create_queues {
                return Err(BrokerError::QueueNotFound { queue: name.clone() });
            }
            self.ensure_address(&mut topology, &configuration.address, routing_type)?;
            let declaration = QueueDeclaration::new(name, &configuration.address, routing_type);
            return self.create_queue_locked(&mut topology, &declaration, false);
        }

        self.ensure_address(&mut topology, &configuration.address, routing_type)?;

        match routing_type {
            RoutingType::Multicast => {
                let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
                let name = format!("{}.subscription-{}", configuration.address, id);
                let declaration =
                    QueueDeclaration::new(name, &configuration.address, RoutingType::Multicast);
                self.create_queue_locked(&mut topology, &declaration, true)
            }
            RoutingType::Anycast => {
                if let Some(queue) = topology.queues.get(&configuration.address) {
                    return Ok(Arc::clone(queue));
                }
                let declaration = QueueDeclaration::new(
                    &configuration.address,
                    &configuration.address,
                    RoutingType::Anycast,
                );
                self.create_queue_locked(&mut topology, &declaration, false)
            }
        }
    }

    fn ensure_address(
        &self,
        topology: &mut Topology,
        name: &str,
        routing_type: RoutingType,
    ) -> BrokerResult<()> {
        match topology.addresses.get_mut(name) {
            Some(address) if address.routing_types.contains(&routing_type) => Ok(()),
            Some(address) if self.settings.auto_create_addresses => {
                address.routing_types.insert(routing_type);
                Ok(())
            }
            Some(_) => Err(BrokerError::RoutingTypeNotSupported {
                address: name.to_string(),
                routing_type,
            }),
            None if self.settings.auto_create_addresses => {
                let address = topology.addresses.entry(name.to_string()).or_default();
                address.routing_types.insert(routing_type);
                Ok(())
            }
            None => Err(BrokerError::AddressNotFound {
                address: name.to_string(),
            }),
        }
    }

    /// Deliver a message to the queues bound to `address`
    ///
    /// Without an explicit routing type the address's own types decide;
    /// multicast wins when both are present.
    pub(crate) fn route(
        &self,
        address_name: &str,
        routing_type: Option<RoutingType>,
        mut message: Message,
        origin_connection: u64,
    ) -> BrokerResult<()> {
        let mut topology = lock_recovering(&self.topology);

        let routing_type = match (topology.addresses.get(address_name), routing_type) {
            (Some(_), Some(rt)) => rt,
            (Some(address), None) => {
                if address.routing_types.contains(&RoutingType::Multicast) {
                    RoutingType::Multicast
                } else {
                    RoutingType::Anycast
                }
            }
            (None, rt) => rt.unwrap_or(RoutingType::Anycast),
        };
        self.ensure_address(&mut topology, address_name, routing_type)?;

        let Topology { addresses, queues } = &mut *topology;
        let Some(address) = addresses.get_mut(address_name) else {
            return Err(BrokerError::AddressNotFound {
                address: address_name.to_string(),
            });
        };

        let candidates: Vec<Arc<MemoryQueue>> = address
            .bindings
            .iter()
            .filter_map(|name| queues.get(name))
            .filter(|queue| queue.declaration().routing_type == routing_type)
            .filter(|queue| queue.accepts(&message))
            .cloned()
            .collect();

        message.delivery_tag = Some(self.next_delivery_tag.fetch_add(1, Ordering::Relaxed));

        match routing_type {
            RoutingType::Multicast => {
                for queue in &candidates {
                    queue.enqueue(Delivery {
                        message: message.clone(),
                        origin_connection,
                    });
                }
            }
            RoutingType::Anycast => {
                if !candidates.is_empty() {
                    let index = address.anycast_cursor % candidates.len();
                    address.anycast_cursor = address.anycast_cursor.wrapping_add(1);
                    candidates[index].enqueue(Delivery {
                        message,
                        origin_connection,
                    });
                }
            }
        }

        if candidates.is_empty() {
            log::trace!(
                "No {} queue bound to '{}'; message dropped",
                routing_type,
                address_name
            );
        }
        Ok(())
    }
}
