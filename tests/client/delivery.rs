//! Message delivery tests: ordering, competing consumers, fan-out and fault isolation

use crate::common::client_helpers::{bodies, eventually, main_connection, recording, Seen};
use artemis_host::broker::memory::InMemoryBroker;
use artemis_host::broker::{
    Connection, Message, ProducerConfiguration, ProducerOptions, RoutingType,
};
use artemis_host::client::{
    handler, ClientBuilder, ConnectionHandle, ConsumerOptions, QueueOptions,
};
use artemis_host::core::cancellation::CancellationContext;
use artemis_host::core::retry::RetryPolicy;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Orders;

fn numbered(count: usize) -> Vec<String> {
    (1..=count).map(|i| i.to_string()).collect()
}

#[tokio::test]
async fn test_single_consumer_preserves_order() {
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
        .unwrap()
        .add_producer::<Orders>("orders", Some(RoutingType::Anycast), ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();

    let producer = client.producer::<Orders>().unwrap();
    for body in numbered(100) {
        producer.send(&Message::new(body), &ctx).await.unwrap();
    }

    assert!(eventually(|| seen.lock().unwrap().len() == 100).await);
    assert_eq!(bodies(&seen), numbered(100));

    client.stop(&ctx).await.unwrap();
    client.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_consumers_share_the_queue() {
    let broker = InMemoryBroker::new();
    let seen: Arc<Mutex<Vec<Seen>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let slow_recorder = handler(move |message, context| {
        let sink = Arc::clone(&sink);
        async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            sink.lock().unwrap().push(Seen {
                body: message.body.clone(),
                instance: context.instance(),
                queue: None,
            });
            context.accept(&message).await?;
            Ok(())
        }
    });

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_consumer(
            "orders",
            RoutingType::Anycast,
            ConsumerOptions::default().with_concurrent_consumers(3),
            slow_recorder,
        )
        .unwrap()
        .add_producer::<Orders>("orders", Some(RoutingType::Anycast), ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();
    assert_eq!(broker.queue_consumer_count("orders"), Some(3));

    let producer = client.producer::<Orders>().unwrap();
    for body in numbered(100) {
        producer.send(&Message::new(body), &ctx).await.unwrap();
    }

    assert!(eventually(|| seen.lock().unwrap().len() == 100).await);
    client.stop(&ctx).await.unwrap();

    let seen = seen.lock().unwrap().clone();
    let delivered: BTreeSet<String> = seen.iter().map(|s| s.body.clone()).collect();
    assert_eq!(seen.len(), 100, "no message is handled twice");
    assert_eq!(delivered.len(), 100, "every message is handled");

    let mut per_instance: HashMap<usize, usize> = HashMap::new();
    for entry in &seen {
        *per_instance.entry(entry.instance).or_default() += 1;
    }
    assert!(
        per_instance.len() >= 2,
        "expected work spread over runtimes, got {:?}",
        per_instance
    );
    assert_eq!(broker.accepted_count("orders"), Some(100));
}

#[tokio::test]
async fn test_multicast_reaches_every_queue() {
    let broker = InMemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_queue_consumer(
            "orders",
            RoutingType::Multicast,
            "orders.billing",
            ConsumerOptions::default(),
            QueueOptions::default(),
            recording(&seen),
        )
        .unwrap()
        .add_queue_consumer(
            "orders",
            RoutingType::Multicast,
            "orders.shipping",
            ConsumerOptions::default(),
            QueueOptions::default(),
            recording(&seen),
        )
        .unwrap()
        .add_producer::<Orders>("orders", Some(RoutingType::Multicast), ProducerOptions::default())
        .unwrap()
        .enable_address_declaration(true)
        .enable_queue_declaration(true);
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();

    let producer = client.producer::<Orders>().unwrap();
    for body in numbered(10) {
        producer.send(&Message::new(body), &ctx).await.unwrap();
    }

    assert!(eventually(|| seen.lock().unwrap().len() == 20).await);
    let seen = seen.lock().unwrap().clone();
    for queue in ["orders.billing", "orders.shipping"] {
        let received: Vec<String> = seen
            .iter()
            .filter(|s| s.queue.as_deref() == Some(queue))
            .map(|s| s.body.clone())
            .collect();
        assert_eq!(received, numbered(10), "queue {}", queue);
    }

    client.stop(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_failing_handler_does_not_stop_delivery() {
    let broker = InMemoryBroker::new();
    let handled = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&handled);
    let fragile = handler(move |message, context| {
        let sink = Arc::clone(&sink);
        async move {
            if message.body == "3" {
                return Err(format!("cannot process {}", message.body).into());
            }
            if message.body == "5" {
                panic!("handler crashed on {}", message.body);
            }
            sink.lock().unwrap().push(message.body.clone());
            context.accept(&message).await?;
            Ok(())
        }
    });

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_consumer("orders", RoutingType::Anycast, ConsumerOptions::default(), fragile)
        .unwrap()
        .add_producer::<Orders>("orders", Some(RoutingType::Anycast), ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();

    let producer = client.producer::<Orders>().unwrap();
    for body in numbered(6) {
        producer.send(&Message::new(body), &ctx).await.unwrap();
    }

    assert!(eventually(|| handled.lock().unwrap().len() == 4).await);
    assert_eq!(*handled.lock().unwrap(), vec!["1", "2", "4", "6"]);
    assert_eq!(broker.accepted_count("orders"), Some(4));

    client.stop(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_consumer_filter_selects_messages() {
    let broker = InMemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_consumer(
            "orders",
            RoutingType::Anycast,
            ConsumerOptions {
                filter_expression: Some("kind = 'express'".to_string()),
                ..ConsumerOptions::default()
            },
            recording(&seen),
        )
        .unwrap()
        .add_producer::<Orders>("orders", Some(RoutingType::Anycast), ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();

    let producer = client.producer::<Orders>().unwrap();
    for (body, kind) in [("a", "express"), ("b", "standard"), ("c", "express")] {
        producer
            .send(&Message::new(body).with_property("kind", kind), &ctx)
            .await
            .unwrap();
    }

    assert!(eventually(|| seen.lock().unwrap().len() == 2).await);
    assert_eq!(bodies(&seen), vec!["a", "c"]);
    assert_eq!(broker.queue_depth("orders"), Some(1));

    client.stop(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_no_local_consumer_skips_own_connection() {
    let broker = InMemoryBroker::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut builder = ClientBuilder::new();
    main_connection(&mut builder, &broker)
        .add_consumer(
            "chat",
            RoutingType::Anycast,
            ConsumerOptions {
                no_local_filter: true,
                ..ConsumerOptions::default()
            },
            recording(&seen),
        )
        .unwrap()
        .add_producer::<Orders>("chat", Some(RoutingType::Anycast), ProducerOptions::default())
        .unwrap();
    let client = builder.build().unwrap();

    let ctx = CancellationContext::new();
    client.start(&ctx).await.unwrap();

    client
        .producer::<Orders>()
        .unwrap()
        .send(&Message::new("own"), &ctx)
        .await
        .unwrap();

    let other = ConnectionHandle::new(
        "other",
        Arc::new(broker.connector()),
        vec![broker.endpoint().clone()],
        RetryPolicy::no_retry(),
    );
    let connection: Arc<dyn Connection> = other.get(&ctx).await.ok().unwrap();
    let foreign = connection
        .create_producer(
            &ProducerConfiguration {
                address: "chat".to_string(),
                routing_type: Some(RoutingType::Anycast),
                options: ProducerOptions::default(),
            },
            &ctx,
        )
        .await
        .unwrap();
    foreign.send(&Message::new("foreign"), &ctx).await.unwrap();

    assert!(eventually(|| !seen.lock().unwrap().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bodies(&seen), vec!["foreign"]);

    client.stop(&ctx).await.unwrap();
}
