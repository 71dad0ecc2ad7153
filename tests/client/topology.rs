//! Topology declaration tests

use crate::common::client_helpers::{main_connection, recording};
use artemis_host::broker::memory::{BrokerSettings, InMemoryBroker};
use artemis_host::broker::{BrokerError, ProducerOptions, QueueDeclaration, RoutingType};
use artemis_host::client::{
    Client, ClientBuilder, ClientError, ConnectionHandle, ConsumerOptions, QueueOptions,
    TopologyReconciler, TopologyRegistry,
};
use artemis_host::core::cancellation::CancellationContext;
use artemis_host::core::retry::RetryPolicy;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

struct OrderEvents;

fn strict_broker() -> InMemoryBroker {
    InMemoryBroker::with_settings(BrokerSettings {
        auto_create_addresses: false,
        auto_create_queues: false,
        ..BrokerSettings::default()
    })
}

/// A client consuming `orders.billing` and producing anycast to `orders`
fn orders_client(broker: &InMemoryBroker, declare: bool) -> Client {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, broker)
        .add_queue_consumer(
            "orders",
            RoutingType::Multicast,
            "orders.billing",
            ConsumerOptions::default(),
            QueueOptions::default(),
            recording(&seen),
        )
        .unwrap()
        .add_producer::<OrderEvents>(
            "orders",
            Some(RoutingType::Anycast),
            ProducerOptions::default(),
        )
        .unwrap()
        .enable_address_declaration(declare)
        .enable_queue_declaration(declare);
    builder.build().unwrap()
}

#[tokio::test]
async fn test_address_gets_every_registered_routing_type() {
    let broker = strict_broker();
    let client = orders_client(&broker, true);

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();

    let expected: BTreeSet<RoutingType> =
        [RoutingType::Anycast, RoutingType::Multicast].into_iter().collect();
    assert_eq!(broker.address_routing_types("orders"), Some(expected));
    assert_eq!(
        broker
            .queue_declaration("orders.billing")
            .map(|q| (q.address, q.routing_type)),
        Some(("orders".to_string(), RoutingType::Multicast))
    );
    assert_eq!(broker.open_topology_managers(), 0);

    client.stop(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let broker = strict_broker();
    let ctx = CancellationContext::new();

    let first = orders_client(&broker, true);
    first.start(&ctx).await.unwrap();
    let second = orders_client(&broker, true);
    second.start(&ctx).await.unwrap();

    assert_eq!(broker.queues_created(), 1);
    assert_eq!(broker.queue_names(), vec!["orders.billing".to_string()]);
    assert_eq!(broker.queue_consumer_count("orders.billing"), Some(2));

    first.stop(&ctx).await.unwrap();
    second.stop(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_existing_queue_is_left_as_is() {
    let broker = strict_broker();
    let ctx = CancellationContext::new();
    let handle = ConnectionHandle::new(
        "main",
        Arc::new(broker.connector()),
        vec![broker.endpoint().clone()],
        RetryPolicy::no_retry(),
    );

    let declare = |max_consumers: i32| {
        let mut registry = TopologyRegistry::new();
        registry.add_address("orders", [RoutingType::Multicast]);
        registry.add_queue(QueueDeclaration {
            max_consumers: Some(max_consumers),
            ..QueueDeclaration::new("orders.billing", "orders", RoutingType::Multicast)
        });
        TopologyReconciler::new(handle.clone(), registry, true, true)
    };

    let created = declare(5).reconcile(&ctx).await.unwrap();
    assert_eq!(created.queues_created, vec!["orders.billing".to_string()]);

    let repeated = declare(1).reconcile(&ctx).await.unwrap();
    assert!(repeated.queues_created.is_empty());
    assert_eq!(repeated.queues_existing, vec!["orders.billing".to_string()]);
    assert_eq!(
        broker
            .queue_declaration("orders.billing")
            .and_then(|q| q.max_consumers),
        Some(5)
    );
    assert_eq!(broker.open_topology_managers(), 0);
}

#[tokio::test]
async fn test_undeclared_topology_fails_on_strict_broker() {
    let broker = strict_broker();
    let client = orders_client(&broker, false);

    let result = client.start(&CancellationContext::new()).await;
    match result {
        Err(ClientError::ConsumerStart { consumer, source }) => {
            assert_eq!(consumer, "orders::orders.billing#0");
            assert_eq!(
                source,
                BrokerError::QueueNotFound {
                    queue: "orders.billing".to_string()
                }
            );
        }
        other => panic!("unexpected startup result: {:?}", other),
    }
    assert_eq!(broker.address_routing_types("orders"), None);
    assert_eq!(broker.queues_created(), 0);
}

#[tokio::test]
async fn test_topology_failure_aborts_startup() {
    let broker = strict_broker();
    let seen = Arc::new(Mutex::new(Vec::new()));

    // Queue on an address that is neither declared nor auto-created
    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_queue_consumer(
            "payments",
            RoutingType::Anycast,
            "payments.audit",
            ConsumerOptions::default(),
            QueueOptions::default(),
            recording(&seen),
        )
        .unwrap()
        .enable_queue_declaration(true);
    let client = builder.build().unwrap();

    let result = client.start(&CancellationContext::new()).await;
    match result {
        Err(ClientError::Topology { connection, source }) => {
            assert_eq!(connection, "main");
            assert!(matches!(source, BrokerError::AddressNotFound { .. }));
        }
        other => panic!("unexpected startup result: {:?}", other),
    }
    assert_eq!(broker.open_topology_managers(), 0);
}
