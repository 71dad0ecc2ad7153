use crate::client::builder::ClientBuilder;
use crate::client::connection::{ConnectionHandle, ConnectionProvider};
use crate::client::consumer::ConsumerState;
use crate::client::error::ClientError;
use crate::client::orchestrator::ClientOrchestrator;
use crate::client::producer::{
    AnonymousProducerHandle, ProducerHandle, TypedAnonymousProducer, TypedProducer,
};
use crate::client::services::Services;
use crate::core::cancellation::CancellationContext;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// A built client: the orchestrator plus access to its producers and connections
pub struct Client {
    orchestrator: ClientOrchestrator,
    connections: ConnectionProvider,
    producers: HashMap<TypeId, Arc<ProducerHandle>>,
    anonymous_producers: HashMap<TypeId, Arc<AnonymousProducerHandle>>,
    services: Services,
}

impl Client {
    pub(crate) fn new(
        orchestrator: ClientOrchestrator,
        connections: ConnectionProvider,
        producers: HashMap<TypeId, Arc<ProducerHandle>>,
        anonymous_producers: HashMap<TypeId, Arc<AnonymousProducerHandle>>,
        services: Services,
    ) -> Self {
        Self {
            orchestrator,
            connections,
            producers,
            anonymous_producers,
            services,
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub async fn start(&self, ctx: &CancellationContext) -> Result<(), ClientError> {
        self.orchestrator.start(ctx).await
    }

    pub async fn stop(&self, ctx: &CancellationContext) -> Result<(), ClientError> {
        self.orchestrator.stop(ctx).await
    }

    /// The producer registered for marker type `P`
    pub fn producer<P: 'static>(&self) -> Option<TypedProducer<P>> {
        self.producers
            .get(&TypeId::of::<P>())
            .map(|handle| TypedProducer::new(Arc::clone(handle)))
    }

    /// The anonymous producer registered for marker type `P`
    pub fn anonymous_producer<P: 'static>(&self) -> Option<TypedAnonymousProducer<P>> {
        self.anonymous_producers
            .get(&TypeId::of::<P>())
            .map(|handle| TypedAnonymousProducer::new(Arc::clone(handle)))
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionHandle> {
        self.connections.handle(name)
    }

    pub fn connections(&self) -> &ConnectionProvider {
        &self.connections
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn consumer_states(&self) -> Vec<(String, ConsumerState)> {
        self.orchestrator
            .consumers()
            .iter()
            .map(|c| (c.label().to_string(), c.state()))
            .collect()
    }

    /// Close every producer, then every connection
    ///
    /// Meant for the owner's teardown after `stop`. Failures are logged and do
    /// not prevent the remaining resources from being closed.
    pub async fn dispose(&self) {
        for producer in self.orchestrator.producers() {
            if let Err(e) = producer.dispose().await {
                log::warn!("Failed to close producer '{}': {}", producer.name(), e);
            }
        }
        for connection in self.connections.handles() {
            if let Err(e) = connection.close().await {
                log::warn!("Failed to close connection '{}': {}", connection.name(), e);
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("orchestrator", &self.orchestrator)
            .field("connections", &self.connections)
            .finish()
    }
}
