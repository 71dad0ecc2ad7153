//! Demo publisher driven by the `[publisher]` configuration section

use crate::broker::Message;
use crate::client::TypedAnonymousProducer;
use crate::config::PublisherConfig;
use crate::core::cancellation::CancellationContext;

/// Marker type of the host's anonymous producer
pub(crate) struct DemoPublisher;

/// Send messages at the configured pace until `count` is reached or `ctx` is cancelled
///
/// Returns the number of messages the broker accepted.
pub(crate) async fn publish(
    producer: TypedAnonymousProducer<DemoPublisher>,
    config: PublisherConfig,
    ctx: CancellationContext,
) -> u64 {
    let mut sent = 0u64;

    while config.count == 0 || sent < config.count {
        if ctx
            .run_until_cancelled(tokio::time::sleep(config.interval()))
            .await
            .is_err()
        {
            break;
        }

        let message = Message::new(format!("message {}", sent + 1))
            .with_property("publisher", "demo")
            .with_property("sequence", (sent + 1).to_string());

        match producer
            .send(&config.address, config.routing_type, &message, &ctx)
            .await
        {
            Ok(()) => sent += 1,
            Err(e) if e.is_cancelled() => break,
            Err(e) => log::warn!("Publisher: send to '{}' failed: {}", config.address, e),
        }
    }

    log::info!("Publisher sent {} message(s) to '{}'", sent, config.address);
    sent
}
