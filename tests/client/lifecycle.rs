//! Startup, producer initialisation and shutdown tests

use crate::common::client_helpers::{eventually, main_connection, recording, WAIT};
use artemis_host::broker::memory::InMemoryBroker;
use artemis_host::broker::{BrokerError, Message, ProducerOptions, RoutingType};
use artemis_host::client::{
    handler, ClientBuilder, ClientError, ConsumerOptions, ConsumerState, MessageContext,
    ProducerError, ReceiveObserver, SendObserver,
};
use artemis_host::core::cancellation::CancellationContext;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

struct Orders;
struct Router;

#[derive(Default)]
struct Counting {
    sent: AtomicUsize,
    received: AtomicUsize,
}

impl SendObserver for Counting {
    fn post_send(&self, _context: &MessageContext<'_>) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }
}

impl ReceiveObserver for Counting {
    fn post_receive(&self, context: &MessageContext<'_>) {
        if context.address == "orders" {
            self.received.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn test_producers_are_initialized_exactly_once() {
    let broker = InMemoryBroker::new();
    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_producer::<Orders>("orders", Some(RoutingType::Anycast), ProducerOptions::default())
        .unwrap()
        .add_anonymous_producer::<Router>(ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();
    let ctx = CancellationContext::new();

    let orders = client.producer::<Orders>().unwrap();
    let early = orders.send(&Message::new("too early"), &ctx).await;
    assert!(matches!(early, Err(ProducerError::Uninitialized { .. })));

    client.start(&ctx).await.unwrap();
    assert!(orders.is_initialized());

    let again = orders.initialize(&ctx).await;
    assert!(matches!(again, Err(ProducerError::AlreadyInitialized { .. })));

    let router = client.anonymous_producer::<Router>().unwrap();
    let again = router.initialize(&ctx).await;
    assert!(matches!(again, Err(ProducerError::AlreadyInitialized { .. })));

    orders.send(&Message::new("on time"), &ctx).await.unwrap();
    client.dispose().await;
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_handlers() {
    let broker = InMemoryBroker::new();
    let entered = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let (e, c) = (Arc::clone(&entered), Arc::clone(&completed));
    let slow = handler(move |message, context| {
        let (e, c) = (Arc::clone(&e), Arc::clone(&c));
        async move {
            e.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(150)).await;
            context.accept(&message).await?;
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_consumer(
            "orders",
            RoutingType::Anycast,
            ConsumerOptions::default().with_concurrent_consumers(2),
            slow,
        )
        .unwrap()
        .add_producer::<Orders>("orders", Some(RoutingType::Anycast), ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();
    let producer = client.producer::<Orders>().unwrap();
    producer.send(&Message::new("a"), &ctx).await.unwrap();
    producer.send(&Message::new("b"), &ctx).await.unwrap();

    assert!(eventually(|| entered.load(Ordering::SeqCst) == 2).await);
    timeout(WAIT, client.stop(&CancellationContext::new()))
        .await
        .unwrap()
        .unwrap();

    // Every handler that started also finished before stop returned
    assert_eq!(completed.load(Ordering::SeqCst), 2);
    assert!(client
        .consumer_states()
        .iter()
        .all(|(_, state)| *state == ConsumerState::Stopped));

    // Nothing is handled after stop
    producer.send(&Message::new("late"), &ctx).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(entered.load(Ordering::SeqCst), 2);
    assert_eq!(broker.queue_depth("orders"), Some(1));
}

#[tokio::test]
async fn test_shutdown_context_stops_consumers() {
    let broker = InMemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_consumer(
            "orders",
            RoutingType::Anycast,
            ConsumerOptions::default(),
            recording(&seen),
        )
        .unwrap();
    let client = builder.build().unwrap();

    let shutdown = CancellationContext::new();
    client.start(&shutdown).await.unwrap();
    shutdown.cancel();

    timeout(WAIT, client.stop(&CancellationContext::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(broker.queue_consumer_count("orders"), Some(0));
}

#[tokio::test]
async fn test_stop_before_start_is_harmless() {
    let broker = InMemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_consumer(
            "orders",
            RoutingType::Anycast,
            ConsumerOptions::default(),
            recording(&seen),
        )
        .unwrap();
    let client = builder.build().unwrap();

    client.stop(&CancellationContext::new()).await.unwrap();
    assert_eq!(broker.connect_attempts(), 0);
    assert_eq!(
        client.consumer_states(),
        vec![("orders#0".to_string(), ConsumerState::Created)]
    );
}

#[tokio::test]
async fn test_cancelled_startup_reports_cancelled() {
    let broker = InMemoryBroker::new();
    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_producer::<Orders>("orders", None, ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    ctx.cancel();
    let result = client.start(&ctx).await;
    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert!(result.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_observers_see_successful_traffic() {
    let broker = InMemoryBroker::new();
    let counting = Arc::new(Counting::default());
    let delivered = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&delivered);
    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_send_observer(counting.clone())
        .add_receive_observer(counting.clone())
        .add_consumer(
            "orders",
            RoutingType::Anycast,
            ConsumerOptions::default(),
            handler(move |message, context| {
                let flag = Arc::clone(&flag);
                async move {
                    context.accept(&message).await?;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap()
        .add_producer::<Orders>("orders", Some(RoutingType::Anycast), ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();
    client
        .producer::<Orders>()
        .unwrap()
        .send(&Message::new("observed"), &ctx)
        .await
        .unwrap();

    assert!(eventually(|| counting.received.load(Ordering::SeqCst) == 1).await);
    assert!(delivered.load(Ordering::SeqCst));
    assert_eq!(counting.sent.load(Ordering::SeqCst), 1);

    client.stop(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_dispose_closes_producers_and_connections() {
    let broker = InMemoryBroker::new();
    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_producer::<Orders>("orders", Some(RoutingType::Anycast), ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();
    client.stop(&ctx).await.unwrap();
    client.dispose().await;

    let result = client
        .producer::<Orders>()
        .unwrap()
        .send(&Message::new("after dispose"), &ctx)
        .await;
    assert!(matches!(
        result,
        Err(ProducerError::Broker(BrokerError::Closed { .. }))
    ));
    let connection = client
        .connection("main")
        .and_then(|handle| handle.get_if_ready())
        .expect("connection was established");
    assert!(!connection.is_open());
}
