//! Registration of connections, consumers and producers
//!
//! ```rust,no_run
//! use artemis_host::broker::memory::InMemoryBroker;
//! use artemis_host::broker::{ProducerOptions, RoutingType};
//! use artemis_host::client::{handler, ClientBuilder, ConsumerOptions, QueueOptions};
//! use std::sync::Arc;
//!
//! struct OrderEvents;
//!
//! # fn example() -> Result<(), artemis_host::client::ClientError> {
//! let broker = InMemoryBroker::new();
//! let mut builder = ClientBuilder::new();
//! builder
//!     .add_connection("main", Arc::new(broker.connector()), vec![broker.endpoint().clone()])?
//!     .add_queue_consumer(
//!         "orders",
//!         RoutingType::Multicast,
//!         "orders.billing",
//!         ConsumerOptions::default().with_concurrent_consumers(3),
//!         QueueOptions::default(),
//!         handler(|message, context| async move {
//!             context.accept(&message).await?;
//!             Ok(())
//!         }),
//!     )?
//!     .add_producer::<OrderEvents>("orders", Some(RoutingType::Multicast), ProducerOptions::default())?
//!     .enable_address_declaration(true)
//!     .enable_queue_declaration(true);
//! let _client = builder.build()?;
//! # Ok(())
//! # }
//! ```

use crate::broker::{
    AnonymousProducerConfiguration, ConsumerConfiguration, Connector, Endpoint,
    ProducerConfiguration, ProducerOptions, QueueDeclaration, RoutingType,
};
use crate::client::connection::{ConnectionHandle, ConnectionProvider};
use crate::client::consumer::{ConsumerRuntime, MessageHandler};
use crate::client::error::ClientError;
use crate::client::observers::{Observers, ReceiveObserver, SendObserver};
use crate::client::options::{ConsumerOptions, QueueOptions};
use crate::client::orchestrator::ClientOrchestrator;
use crate::client::producer::{AnonymousProducerHandle, ProducerHandle, ProducerInitializer};
use crate::client::runtime::Client;
use crate::client::services::Services;
use crate::client::topology::{TopologyReconciler, TopologyRegistry};
use crate::core::retry::RetryPolicy;
use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct ConsumerRegistration {
    configuration: ConsumerConfiguration,
    routing_type: Option<RoutingType>,
    concurrent_consumers: usize,
    handler: MessageHandler,
}

struct ProducerRegistration {
    type_id: TypeId,
    type_name: &'static str,
    configuration: ProducerConfiguration,
}

struct AnonymousProducerRegistration {
    type_id: TypeId,
    type_name: &'static str,
    configuration: AnonymousProducerConfiguration,
}

struct ConnectionRegistration {
    name: String,
    connector: Arc<dyn Connector>,
    endpoints: Vec<Endpoint>,
    retry: RetryPolicy,
    consumers: Vec<ConsumerRegistration>,
    producers: Vec<ProducerRegistration>,
    anonymous_producers: Vec<AnonymousProducerRegistration>,
    topology: TopologyRegistry,
    declare_addresses: bool,
    declare_queues: bool,
    observers: Observers,
}

/// Collects registrations and builds a [`Client`]
#[derive(Default)]
pub struct ClientBuilder {
    services: Services,
    connections: Vec<ConnectionRegistration>,
    producer_types: HashSet<TypeId>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Services handed to every consumer handler
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.services
    }

    /// Register a logical connection and continue configuring it
    pub fn add_connection(
        &mut self,
        name: impl Into<String>,
        connector: Arc<dyn Connector>,
        endpoints: Vec<Endpoint>,
    ) -> Result<ConnectionBuilder<'_>, ClientError> {
        let name = name.into();
        if self.connections.iter().any(|c| c.name == name) {
            return Err(ClientError::DuplicateConnection { name });
        }
        if endpoints.is_empty() {
            return Err(ClientError::InvalidRegistration {
                message: format!("connection '{}' has no endpoints", name),
            });
        }

        self.connections.push(ConnectionRegistration {
            name,
            connector,
            endpoints,
            retry: RetryPolicy::default(),
            consumers: Vec::new(),
            producers: Vec::new(),
            anonymous_producers: Vec::new(),
            topology: TopologyRegistry::new(),
            declare_addresses: false,
            declare_queues: false,
            observers: Observers::default(),
        });

        let index = self.connections.len() - 1;
        Ok(ConnectionBuilder {
            registration: &mut self.connections[index],
            producer_types: &mut self.producer_types,
        })
    }

    /// Continue configuring an already registered connection
    pub fn connection(&mut self, name: &str) -> Option<ConnectionBuilder<'_>> {
        let registration = self.connections.iter_mut().find(|c| c.name == name)?;
        Some(ConnectionBuilder {
            registration,
            producer_types: &mut self.producer_types,
        })
    }

    pub fn build(self) -> Result<Client, ClientError> {
        let mut connections = ConnectionProvider::new();
        let mut initializers: Vec<Arc<dyn ProducerInitializer>> = Vec::new();
        let mut producers = HashMap::new();
        let mut anonymous_producers = HashMap::new();
        let mut reconcilers = Vec::new();
        let mut consumers = Vec::new();

        for registration in self.connections {
            let connection = ConnectionHandle::new(
                registration.name.clone(),
                registration.connector,
                registration.endpoints,
                registration.retry,
            );
            connections.insert(connection.clone())?;

            for producer in registration.producers {
                let handle = Arc::new(ProducerHandle::new(
                    producer.type_name,
                    connection.clone(),
                    producer.configuration,
                    registration.observers.clone(),
                ));
                initializers.push(handle.clone());
                producers.insert(producer.type_id, handle);
            }

            for producer in registration.anonymous_producers {
                let handle = Arc::new(AnonymousProducerHandle::new(
                    producer.type_name,
                    connection.clone(),
                    producer.configuration,
                    registration.observers.clone(),
                ));
                initializers.push(handle.clone());
                anonymous_producers.insert(producer.type_id, handle);
            }

            reconcilers.push(TopologyReconciler::new(
                connection.clone(),
                registration.topology,
                registration.declare_addresses,
                registration.declare_queues,
            ));

            for consumer in registration.consumers {
                for instance in 0..consumer.concurrent_consumers {
                    consumers.push(Arc::new(ConsumerRuntime::new(
                        connection.clone(),
                        consumer.configuration.clone(),
                        consumer.routing_type,
                        instance,
                        Arc::clone(&consumer.handler),
                        self.services.clone(),
                        registration.observers.clone(),
                    )));
                }
            }
        }

        Ok(Client::new(
            ClientOrchestrator::new(initializers, reconcilers, consumers),
            connections,
            producers,
            anonymous_producers,
            self.services,
        ))
    }
}

/// Registrations for one logical connection
pub struct ConnectionBuilder<'a> {
    registration: &'a mut ConnectionRegistration,
    producer_types: &'a mut HashSet<TypeId>,
}

impl ConnectionBuilder<'_> {
    pub fn name(&self) -> &str {
        &self.registration.name
    }

    /// Consume from an address; the broker decides which queue backs it
    pub fn add_consumer(
        &mut self,
        address: impl Into<String>,
        routing_type: RoutingType,
        options: ConsumerOptions,
        handler: MessageHandler,
    ) -> Result<&mut Self, ClientError> {
        let address = non_empty("address", address.into())?;
        validate_consumer_options(&options)?;

        self.registration.consumers.push(ConsumerRegistration {
            configuration: ConsumerConfiguration {
                address,
                routing_type: Some(routing_type),
                queue: None,
                credit: options.credit,
                filter_expression: options.filter_expression,
                no_local_filter: options.no_local_filter,
            },
            routing_type: Some(routing_type),
            concurrent_consumers: options.concurrent_consumers,
            handler,
        });
        Ok(self)
    }

    /// Consume from a named queue, declaring it and its address when declaration is enabled
    pub fn add_queue_consumer(
        &mut self,
        address: impl Into<String>,
        routing_type: RoutingType,
        queue: impl Into<String>,
        consumer_options: ConsumerOptions,
        queue_options: QueueOptions,
        handler: MessageHandler,
    ) -> Result<&mut Self, ClientError> {
        let address = non_empty("address", address.into())?;
        let queue = non_empty("queue", queue.into())?;
        validate_consumer_options(&consumer_options)?;

        let declaration = QueueDeclaration {
            filter_expression: queue_options.filter_expression,
            exclusive: queue_options.exclusive,
            group_rebalance: queue_options.group_rebalance,
            group_buckets: queue_options.group_buckets,
            max_consumers: queue_options.max_consumers,
            auto_create_address: queue_options.auto_create_address,
            purge_on_no_consumers: queue_options.purge_on_no_consumers,
            ..QueueDeclaration::new(&queue, &address, routing_type)
        };
        self.registration.topology.add_queue(declaration);
        self.registration
            .topology
            .add_address(&address, [routing_type]);

        self.registration.consumers.push(ConsumerRegistration {
            configuration: ConsumerConfiguration {
                address,
                routing_type: Some(routing_type),
                queue: Some(queue),
                credit: consumer_options.credit,
                filter_expression: consumer_options.filter_expression,
                no_local_filter: consumer_options.no_local_filter,
            },
            routing_type: Some(routing_type),
            concurrent_consumers: consumer_options.concurrent_consumers,
            handler,
        });
        Ok(self)
    }

    /// Register a producer identified by the marker type `P`
    ///
    /// Without a routing type the address is declared with both.
    pub fn add_producer<P: 'static>(
        &mut self,
        address: impl Into<String>,
        routing_type: Option<RoutingType>,
        options: ProducerOptions,
    ) -> Result<&mut Self, ClientError> {
        let address = non_empty("address", address.into())?;
        self.claim_producer_type::<P>()?;

        let routing_types = match routing_type {
            Some(rt) => vec![rt],
            None => vec![RoutingType::Anycast, RoutingType::Multicast],
        };
        self.registration.topology.add_address(&address, routing_types);

        self.registration.producers.push(ProducerRegistration {
            type_id: TypeId::of::<P>(),
            type_name: type_name::<P>(),
            configuration: ProducerConfiguration {
                address,
                routing_type,
                options,
            },
        });
        Ok(self)
    }

    /// Register an anonymous producer identified by the marker type `P`
    pub fn add_anonymous_producer<P: 'static>(
        &mut self,
        options: ProducerOptions,
    ) -> Result<&mut Self, ClientError> {
        self.claim_producer_type::<P>()?;

        self.registration
            .anonymous_producers
            .push(AnonymousProducerRegistration {
                type_id: TypeId::of::<P>(),
                type_name: type_name::<P>(),
                configuration: AnonymousProducerConfiguration { options },
            });
        Ok(self)
    }

    pub fn enable_address_declaration(&mut self, enabled: bool) -> &mut Self {
        self.registration.declare_addresses = enabled;
        self
    }

    pub fn enable_queue_declaration(&mut self, enabled: bool) -> &mut Self {
        self.registration.declare_queues = enabled;
        self
    }

    pub fn add_send_observer(&mut self, observer: Arc<dyn SendObserver>) -> &mut Self {
        self.registration.observers.add_send(observer);
        self
    }

    pub fn add_receive_observer(&mut self, observer: Arc<dyn ReceiveObserver>) -> &mut Self {
        self.registration.observers.add_receive(observer);
        self
    }

    /// Replace the connector with one derived from it
    ///
    /// `configure` receives the registered connector and returns the one the
    /// connection will use, typically a wrapper that adjusts endpoints or
    /// instruments connects.
    pub fn configure_connector<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn Connector>) -> Arc<dyn Connector>,
    {
        let connector = Arc::clone(&self.registration.connector);
        self.registration.connector = configure(connector);
        self
    }

    /// Retry policy for establishing this connection
    pub fn connect_retry(&mut self, policy: RetryPolicy) -> &mut Self {
        self.registration.retry = policy;
        self
    }

    fn claim_producer_type<P: 'static>(&mut self) -> Result<(), ClientError> {
        if !self.producer_types.insert(TypeId::of::<P>()) {
            return Err(ClientError::DuplicateProducer {
                type_name: type_name::<P>(),
            });
        }
        Ok(())
    }
}

fn non_empty(what: &str, value: String) -> Result<String, ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::InvalidRegistration {
            message: format!("{} name must not be empty", what),
        });
    }
    Ok(value)
}

fn validate_consumer_options(options: &ConsumerOptions) -> Result<(), ClientError> {
    if options.concurrent_consumers == 0 {
        return Err(ClientError::InvalidRegistration {
            message: "concurrent_consumers must be at least 1".to_string(),
        });
    }
    Ok(())
}
