//! Shared connection establishment tests

use crate::common::client_helpers::{main_connection, recording};
use artemis_host::broker::memory::InMemoryBroker;
use artemis_host::broker::{BrokerError, Endpoint, ProducerOptions, RoutingType};
use artemis_host::client::{
    ClientBuilder, ClientError, ConnectionHandle, ConsumerOptions, ConsumerState,
};
use artemis_host::core::cancellation::CancellationContext;
use artemis_host::core::lazy::InitState;
use artemis_host::core::retry::RetryPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;

struct Orders;
struct Router;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_connects_once() {
    let broker = InMemoryBroker::new();
    let handle = ConnectionHandle::new(
        "main",
        Arc::new(broker.connector().with_connect_delay(Duration::from_millis(50))),
        vec![broker.endpoint().clone()],
        RetryPolicy::no_retry(),
    );
    assert_eq!(handle.state(), InitState::NotStarted);

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let handle = handle.clone();
        tasks.spawn(async move { handle.get(&CancellationContext::new()).await });
    }

    let mut connections = Vec::new();
    while let Some(result) = tasks.join_next().await {
        connections.push(result.unwrap().ok().expect("connection"));
    }

    assert_eq!(broker.connect_attempts(), 1);
    assert_eq!(handle.state(), InitState::Completed);
    assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
}

#[tokio::test]
async fn test_client_components_share_one_connection() {
    let broker = InMemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_consumer(
            "orders",
            RoutingType::Anycast,
            ConsumerOptions::default().with_concurrent_consumers(3),
            recording(&seen),
        )
        .unwrap()
        .add_queue_consumer(
            "orders",
            RoutingType::Multicast,
            "orders.audit",
            ConsumerOptions::default(),
            Default::default(),
            recording(&seen),
        )
        .unwrap()
        .add_producer::<Orders>("orders", None, ProducerOptions::default())
        .unwrap()
        .add_anonymous_producer::<Router>(ProducerOptions::default())
        .unwrap()
        .enable_address_declaration(true)
        .enable_queue_declaration(true);
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();

    assert_eq!(broker.connect_attempts(), 1);
    assert_eq!(client.consumer_states().len(), 4);

    client.stop(&ctx).await.unwrap();
    client.dispose().await;
}

#[tokio::test]
async fn test_transient_connect_failures_are_retried() {
    let broker = InMemoryBroker::new();
    broker.fail_next_connects(2);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .connect_retry(RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        })
        .add_consumer(
            "orders",
            RoutingType::Anycast,
            ConsumerOptions::default(),
            recording(&seen),
        )
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();
    assert_eq!(broker.connect_attempts(), 3);

    client.stop(&ctx).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_failure_reaches_every_waiter() {
    let broker = InMemoryBroker::new();
    let handle = ConnectionHandle::new(
        "main",
        Arc::new(broker.connector().with_connect_delay(Duration::from_millis(20))),
        vec![Endpoint::new("unreachable", 1)],
        RetryPolicy::no_retry(),
    );

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let handle = handle.clone();
        tasks.spawn(async move { handle.get(&CancellationContext::new()).await.err() });
    }

    let mut errors = Vec::new();
    while let Some(result) = tasks.join_next().await {
        errors.push(result.unwrap().expect("connect should fail"));
    }
    assert!(errors
        .iter()
        .all(|e| matches!(e, BrokerError::ConnectionFailed { .. }) && *e == errors[0]));

    // The failure is memoized; later callers get it without a new attempt
    let again = handle.get(&CancellationContext::new()).await.err();
    assert_eq!(again.as_ref(), Some(&errors[0]));
    assert_eq!(broker.connect_attempts(), 1);
    assert_eq!(handle.state(), InitState::Failed);
}

#[tokio::test]
async fn test_unreachable_broker_fails_startup() {
    let broker = InMemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ClientBuilder::new();
    builder
        .add_connection(
            "main",
            Arc::new(broker.connector()),
            vec![Endpoint::new("elsewhere", 5672)],
        )
        .unwrap()
        .connect_retry(RetryPolicy::no_retry())
        .add_consumer(
            "orders",
            RoutingType::Anycast,
            ConsumerOptions::default(),
            recording(&seen),
        )
        .unwrap();
    let client = builder.build().unwrap();

    let result = client.start(&CancellationContext::new()).await;
    match result {
        Err(ClientError::ConsumerStart { consumer, source }) => {
            assert_eq!(consumer, "orders#0");
            assert!(matches!(source, BrokerError::ConnectionFailed { .. }));
        }
        other => panic!("unexpected startup result: {:?}", other),
    }
    assert_eq!(
        client.consumer_states(),
        vec![("orders#0".to_string(), ConsumerState::Created)]
    );
}
