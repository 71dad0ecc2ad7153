//! Connector and connection of the in-memory broker

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::endpoints::{MemoryAnonymousProducer, MemoryConsumer, MemoryProducer};
use crate::broker::memory::filter::Selector;
use crate::broker::memory::queue::TakeFilter;
use crate::broker::memory::state::BrokerState;
use crate::broker::memory::topology::MemoryTopologyManager;
use crate::broker::traits::{
    AnonymousProducer, Connection, Connector, Consumer, Producer, TopologyManager,
};
use crate::broker::types::{
    AnonymousProducerConfiguration, ConsumerConfiguration, Endpoint, ProducerConfiguration,
};
use crate::core::cancellation::CancellationContext;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Opens [`InMemoryConnection`]s to one broker
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    state: Arc<BrokerState>,
    connect_delay: Duration,
}

impl InMemoryConnector {
    pub(crate) fn new(state: Arc<BrokerState>) -> Self {
        Self {
            state,
            connect_delay: Duration::ZERO,
        }
    }

    /// Make every connection attempt take at least `delay`
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    fn take_injected_failure(&self) -> bool {
        self.state
            .pending_connect_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(
        &self,
        endpoints: &[Endpoint],
        ctx: &CancellationContext,
    ) -> BrokerResult<Arc<dyn Connection>> {
        if endpoints.is_empty() {
            return Err(BrokerError::NoEndpoints);
        }

        self.state.connect_attempts.fetch_add(1, Ordering::AcqRel);

        if !self.connect_delay.is_zero() {
            ctx.run_until_cancelled(tokio::time::sleep(self.connect_delay))
                .await?;
        }

        if self.take_injected_failure() {
            return Err(BrokerError::ConnectionFailed {
                endpoint: endpoints[0].to_string(),
                message: "connection refused".to_string(),
            });
        }

        let listening = &self.state.settings.endpoint;
        let Some(endpoint) = endpoints
            .iter()
            .find(|ep| ep.host == listening.host && ep.port == listening.port)
        else {
            let last = &endpoints[endpoints.len() - 1];
            return Err(BrokerError::ConnectionFailed {
                endpoint: last.to_string(),
                message: "no broker listening".to_string(),
            });
        };

        let connection = InMemoryConnection::new(Arc::clone(&self.state));
        log::debug!("Connection {} established to {}", connection.id, endpoint);
        Ok(Arc::new(connection))
    }
}

/// A live connection; closing it closes every consumer and producer it created
#[derive(Debug)]
pub struct InMemoryConnection {
    id: u64,
    state: Arc<BrokerState>,
    scope: CancellationContext,
    next_producer_id: AtomicU64,
}

impl InMemoryConnection {
    fn new(state: Arc<BrokerState>) -> Self {
        Self {
            id: state.next_connection_id(),
            state,
            scope: CancellationContext::new(),
            next_producer_id: AtomicU64::new(1),
        }
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.scope.is_cancelled() {
            Err(BrokerError::closed(format!("connection {}", self.id)))
        } else {
            Ok(())
        }
    }

    fn producer_name(&self) -> String {
        let n = self.next_producer_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.id, n)
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn create_consumer(
        &self,
        configuration: &ConsumerConfiguration,
        ctx: &CancellationContext,
    ) -> BrokerResult<Arc<dyn Consumer>> {
        self.ensure_open()?;
        if ctx.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }

        let selector = configuration
            .filter_expression
            .as_deref()
            .map(Selector::parse)
            .transpose()?;

        let queue = self.state.resolve_consumer_queue(configuration)?;
        if let Err(error) = queue.attach_consumer() {
            if queue.is_temporary() {
                self.state.delete_queue(queue.name());
            }
            return Err(error);
        }

        let filter = TakeFilter {
            selector,
            exclude_origin: configuration.no_local_filter.then_some(self.id),
        };

        log::debug!(
            "Consumer attached to queue '{}' on address '{}'",
            queue.name(),
            configuration.address
        );

        Ok(Arc::new(MemoryConsumer::new(
            Arc::clone(&self.state),
            queue,
            filter,
            self.scope.child(),
        )))
    }

    async fn create_producer(
        &self,
        configuration: &ProducerConfiguration,
        ctx: &CancellationContext,
    ) -> BrokerResult<Arc<dyn Producer>> {
        self.ensure_open()?;
        if ctx.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }

        Ok(Arc::new(MemoryProducer::new(
            self.producer_name(),
            self.id,
            Arc::clone(&self.state),
            configuration.clone(),
            self.scope.child(),
        )))
    }

    async fn create_anonymous_producer(
        &self,
        configuration: &AnonymousProducerConfiguration,
        ctx: &CancellationContext,
    ) -> BrokerResult<Arc<dyn AnonymousProducer>> {
        self.ensure_open()?;
        if ctx.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }

        Ok(Arc::new(MemoryAnonymousProducer::new(
            self.producer_name(),
            self.id,
            Arc::clone(&self.state),
            configuration.options.clone(),
            self.scope.child(),
        )))
    }

    async fn open_topology_manager(
        &self,
        ctx: &CancellationContext,
    ) -> BrokerResult<Box<dyn TopologyManager>> {
        self.ensure_open()?;
        if ctx.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        Ok(Box::new(MemoryTopologyManager::open(Arc::clone(&self.state))))
    }

    fn is_open(&self) -> bool {
        !self.scope.is_cancelled()
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.scope.is_cancelled() {
            log::debug!("Closing connection {}", self.id);
            self.scope.cancel();
        }
        Ok(())
    }
}
