//! Helpers for building clients against the in-memory broker

use artemis_host::broker::memory::InMemoryBroker;
use artemis_host::client::{handler, ClientBuilder, ConnectionBuilder, MessageHandler};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(10);

/// Register the connection `main` on `builder`, pointing at `broker`
pub fn main_connection<'a>(
    builder: &'a mut ClientBuilder,
    broker: &InMemoryBroker,
) -> ConnectionBuilder<'a> {
    builder
        .add_connection(
            "main",
            Arc::new(broker.connector()),
            vec![broker.endpoint().clone()],
        )
        .expect("connection registration")
}

/// A delivery seen by a recording handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub body: String,
    pub instance: usize,
    pub queue: Option<String>,
}

/// Handler that records every delivery and accepts it
pub fn recording(seen: &Arc<Mutex<Vec<Seen>>>) -> MessageHandler {
    let seen = Arc::clone(seen);
    handler(move |message, context| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().unwrap().push(Seen {
                body: message.body.clone(),
                instance: context.instance(),
                queue: context.queue().map(str::to_string),
            });
            context.accept(&message).await?;
            Ok(())
        }
    })
}

pub fn bodies(seen: &Arc<Mutex<Vec<Seen>>>) -> Vec<String> {
    seen.lock().unwrap().iter().map(|s| s.body.clone()).collect()
}

/// Poll `condition` every few milliseconds until it holds or `WAIT` elapses
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
