//! Shared fixtures for client tests

use crate::broker::memory::InMemoryBroker;
use crate::broker::{Producer, ProducerConfiguration, ProducerOptions, RoutingType};
use crate::client::connection::ConnectionHandle;
use crate::client::observers::{MessageContext, ReceiveObserver, SendObserver};
use crate::core::cancellation::CancellationContext;
use crate::core::retry::RetryPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(super) const WAIT: Duration = Duration::from_secs(5);

pub(super) fn connection(broker: &InMemoryBroker) -> ConnectionHandle {
    ConnectionHandle::new(
        "test",
        Arc::new(broker.connector()),
        vec![broker.endpoint().clone()],
        RetryPolicy::no_retry(),
    )
}

/// Connection whose first connect takes `delay`
pub(super) fn slow_connection(broker: &InMemoryBroker, delay: Duration) -> ConnectionHandle {
    ConnectionHandle::new(
        "test",
        Arc::new(broker.connector().with_connect_delay(delay)),
        vec![broker.endpoint().clone()],
        RetryPolicy::no_retry(),
    )
}

/// Broker producer on its own connection, bypassing the client's handles
pub(super) async fn raw_producer(
    broker: &InMemoryBroker,
    address: &str,
    routing_type: Option<RoutingType>,
) -> Arc<dyn Producer> {
    let ctx = CancellationContext::new();
    connection(broker)
        .get(&ctx)
        .await
        .unwrap()
        .create_producer(
            &ProducerConfiguration {
                address: address.to_string(),
                routing_type,
                options: ProducerOptions::default(),
            },
            &ctx,
        )
        .await
        .unwrap()
}

/// Records observer callbacks as `phase:address:body`
#[derive(Default)]
pub(super) struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn record(&self, phase: &str, context: &MessageContext<'_>) {
        self.events.lock().unwrap().push(format!(
            "{}:{}:{}",
            phase, context.address, context.message.body
        ));
    }

    pub(super) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl SendObserver for Recorder {
    fn pre_send(&self, context: &MessageContext<'_>) {
        self.record("pre_send", context);
    }

    fn post_send(&self, context: &MessageContext<'_>) {
        self.record("post_send", context);
    }
}

impl ReceiveObserver for Recorder {
    fn pre_receive(&self, context: &MessageContext<'_>) {
        self.record("pre_receive", context);
    }

    fn post_receive(&self, context: &MessageContext<'_>) {
        self.record("post_receive", context);
    }
}

/// Poll `condition` until it holds or `WAIT` elapses
pub(super) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
