//! Consumers and producers handed out by [`InMemoryConnection`](super::InMemoryConnection)

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::queue::{MemoryQueue, TakeFilter};
use crate::broker::memory::state::BrokerState;
use crate::broker::traits::{AnonymousProducer, Consumer, Producer};
use crate::broker::types::{
    Message, MessageIdPolicy, ProducerConfiguration, ProducerOptions, RoutingType,
};
use crate::core::cancellation::CancellationContext;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct MemoryConsumer {
    state: Arc<BrokerState>,
    queue: Arc<MemoryQueue>,
    filter: TakeFilter,
    scope: CancellationContext,
    detached: AtomicBool,
}

impl MemoryConsumer {
    pub(crate) fn new(
        state: Arc<BrokerState>,
        queue: Arc<MemoryQueue>,
        filter: TakeFilter,
        scope: CancellationContext,
    ) -> Self {
        Self {
            state,
            queue,
            filter,
            scope,
            detached: AtomicBool::new(false),
        }
    }

    fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.detach_consumer();
        if self.queue.is_temporary() {
            self.state.delete_queue(self.queue.name());
        }
    }

    fn closed_error(&self) -> BrokerError {
        BrokerError::closed(format!("consumer on queue '{}'", self.queue.name()))
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn receive(&self, ctx: &CancellationContext) -> BrokerResult<Message> {
        if ctx.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        if self.scope.is_cancelled() {
            return Err(self.closed_error());
        }

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(BrokerError::Cancelled),
            _ = self.scope.cancelled() => Err(self.closed_error()),
            message = self.queue.take(&self.filter) => Ok(message),
        }
    }

    async fn accept(&self, _message: &Message) -> BrokerResult<()> {
        self.queue.record_accept();
        Ok(())
    }

    async fn reject(&self, _message: &Message) -> BrokerResult<()> {
        self.queue.record_reject();
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        self.scope.cancel();
        self.detach();
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Stamps producer defaults onto outgoing messages
#[derive(Debug)]
struct Stamper {
    name: String,
    options: ProducerOptions,
    sequence: AtomicU64,
}

impl Stamper {
    fn new(name: String, options: ProducerOptions) -> Self {
        Self {
            name,
            options,
            sequence: AtomicU64::new(1),
        }
    }

    fn stamp(&self, message: &Message) -> Message {
        let mut message = message.clone();
        if message.priority.is_none() {
            message.priority = self.options.message_priority;
        }
        if message.durability.is_none() {
            message.durability = self.options.message_durability;
        }
        if self.options.set_message_creation_time && message.creation_time.is_none() {
            message.creation_time = Some(Utc::now());
        }
        if self.options.message_id_policy == MessageIdPolicy::Sequential
            && message.message_id.is_none()
        {
            let n = self.sequence.fetch_add(1, Ordering::Relaxed);
            message.message_id = Some(format!("ID:{}-{}", self.name, n));
        }
        message
    }
}

#[derive(Debug)]
pub(crate) struct MemoryProducer {
    stamper: Stamper,
    connection_id: u64,
    state: Arc<BrokerState>,
    configuration: ProducerConfiguration,
    scope: CancellationContext,
}

impl MemoryProducer {
    pub(crate) fn new(
        name: String,
        connection_id: u64,
        state: Arc<BrokerState>,
        configuration: ProducerConfiguration,
        scope: CancellationContext,
    ) -> Self {
        Self {
            stamper: Stamper::new(name, configuration.options.clone()),
            connection_id,
            state,
            configuration,
            scope,
        }
    }

    fn deliver(&self, message: &Message) -> BrokerResult<()> {
        if self.scope.is_cancelled() {
            return Err(BrokerError::closed(format!(
                "producer for address '{}'",
                self.configuration.address
            )));
        }
        self.state.route(
            &self.configuration.address,
            self.configuration.routing_type,
            self.stamper.stamp(message),
            self.connection_id,
        )
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn send(&self, message: &Message, ctx: &CancellationContext) -> BrokerResult<()> {
        if ctx.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        self.deliver(message)
    }

    fn send_nowait(&self, message: &Message) -> BrokerResult<()> {
        self.deliver(message)
    }

    async fn close(&self) -> BrokerResult<()> {
        self.scope.cancel();
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct MemoryAnonymousProducer {
    stamper: Stamper,
    connection_id: u64,
    state: Arc<BrokerState>,
    scope: CancellationContext,
}

impl MemoryAnonymousProducer {
    pub(crate) fn new(
        name: String,
        connection_id: u64,
        state: Arc<BrokerState>,
        options: ProducerOptions,
        scope: CancellationContext,
    ) -> Self {
        Self {
            stamper: Stamper::new(name, options),
            connection_id,
            state,
            scope,
        }
    }

    fn deliver(
        &self,
        address: &str,
        routing_type: Option<RoutingType>,
        message: &Message,
    ) -> BrokerResult<()> {
        if self.scope.is_cancelled() {
            return Err(BrokerError::closed("anonymous producer"));
        }
        self.state.route(
            address,
            routing_type,
            self.stamper.stamp(message),
            self.connection_id,
        )
    }
}

#[async_trait]
impl AnonymousProducer for MemoryAnonymousProducer {
    async fn send(
        &self,
        address: &str,
        routing_type: Option<RoutingType>,
        message: &Message,
        ctx: &CancellationContext,
    ) -> BrokerResult<()> {
        if ctx.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        self.deliver(address, routing_type, message)
    }

    fn send_nowait(
        &self,
        address: &str,
        routing_type: Option<RoutingType>,
        message: &Message,
    ) -> BrokerResult<()> {
        self.deliver(address, routing_type, message)
    }

    async fn close(&self) -> BrokerResult<()> {
        self.scope.cancel();
        Ok(())
    }
}
