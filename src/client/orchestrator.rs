//! Startup and shutdown sequencing for one client

use crate::client::consumer::ConsumerRuntime;
use crate::client::error::ClientError;
use crate::client::producer::ProducerInitializer;
use crate::client::topology::TopologyReconciler;
use crate::core::cancellation::CancellationContext;
use futures::future::join_all;
use std::sync::Arc;

/// Runs the three startup phases in order and stops consumers on shutdown
///
/// ```text
/// start: producers.initialize ─► topology.reconcile ─► consumers.start
/// stop:  consumers.stop (all, concurrently)
/// ```
///
/// Producers and connections are not touched by `stop`; they belong to
/// whoever owns the client.
pub struct ClientOrchestrator {
    producers: Vec<Arc<dyn ProducerInitializer>>,
    reconcilers: Vec<TopologyReconciler>,
    consumers: Vec<Arc<ConsumerRuntime>>,
}

impl ClientOrchestrator {
    pub fn new(
        producers: Vec<Arc<dyn ProducerInitializer>>,
        reconcilers: Vec<TopologyReconciler>,
        consumers: Vec<Arc<ConsumerRuntime>>,
    ) -> Self {
        Self {
            producers,
            reconcilers,
            consumers,
        }
    }

    pub fn consumers(&self) -> &[Arc<ConsumerRuntime>] {
        &self.consumers
    }

    pub fn producers(&self) -> &[Arc<dyn ProducerInitializer>] {
        &self.producers
    }

    /// Bring the client up; the first failure aborts startup
    ///
    /// If a consumer fails to start, the consumers started before it are
    /// stopped again so no receive loop outlives a failed startup.
    pub async fn start(&self, ctx: &CancellationContext) -> Result<(), ClientError> {
        log::info!(
            "Starting client: {} producer(s), {} topology reconciler(s), {} consumer(s)",
            self.producers.len(),
            self.reconcilers.len(),
            self.consumers.len()
        );

        for producer in &self.producers {
            producer.initialize(ctx).await?;
        }

        for reconciler in &self.reconcilers {
            reconciler
                .reconcile(ctx)
                .await
                .map_err(|e| ClientError::topology(reconciler.connection_name(), e))?;
        }

        for (index, consumer) in self.consumers.iter().enumerate() {
            if let Err(e) = consumer.start(ctx).await {
                let error = ClientError::consumer_start(consumer.label(), e);
                log::error!("{}; stopping {} started consumer(s)", error, index);
                join_all(self.consumers[..index].iter().map(|c| c.stop())).await;
                return Err(error);
            }
        }

        log::info!("Client started");
        Ok(())
    }

    /// Stop every consumer and wait for their loops to drain
    ///
    /// Returns `Cancelled` if `ctx` is cancelled before all loops finished;
    /// the loops have been told to stop either way.
    pub async fn stop(&self, ctx: &CancellationContext) -> Result<(), ClientError> {
        log::info!("Stopping {} consumer(s)", self.consumers.len());

        for consumer in &self.consumers {
            consumer.request_stop();
        }
        let stops = join_all(self.consumers.iter().map(|c| c.stop()));
        ctx.run_until_cancelled(stops).await?;

        log::info!("Client stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ClientOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOrchestrator")
            .field("producers", &self.producers.len())
            .field("reconcilers", &self.reconcilers.len())
            .field("consumers", &self.consumers)
            .finish()
    }
}
