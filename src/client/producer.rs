//! Producer handles with an explicit, single initialisation step
//!
//! A handle is created at registration time but owns no broker producer until
//! [`ProducerHandle::initialize`] runs, which the orchestrator does once at
//! startup. Initialising twice is an error rather than a silent no-op, and so
//! is sending before initialisation.

use crate::broker::{
    AnonymousProducer, AnonymousProducerConfiguration, BrokerError, BrokerResult, Message,
    Producer, ProducerConfiguration, RoutingType,
};
use crate::client::connection::ConnectionHandle;
use crate::client::error::ProducerError;
use crate::client::observers::{MessageContext, Observers};
use crate::core::cancellation::CancellationContext;
use crate::core::lazy::SharedAsyncInit;
use async_trait::async_trait;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Producer lifecycle as seen by the orchestrator
#[async_trait]
pub trait ProducerInitializer: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self, ctx: &CancellationContext) -> Result<(), ProducerError>;

    /// Close the broker producer if it was ever created
    async fn dispose(&self) -> BrokerResult<()>;
}

/// Claim-once bookkeeping shared by both handle kinds
#[derive(Debug, Default)]
struct InitGuard {
    claimed: AtomicBool,
    initialized: AtomicBool,
}

impl InitGuard {
    async fn run<T>(
        &self,
        name: &str,
        init: &SharedAsyncInit<T, BrokerError>,
        ctx: &CancellationContext,
    ) -> Result<(), ProducerError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProducerError::AlreadyInitialized {
                producer: name.to_string(),
            });
        }

        match init.get(ctx).await {
            Ok(_) => {
                self.initialized.store(true, Ordering::Release);
                log::debug!("Producer '{}' initialized", name);
                Ok(())
            }
            Err(e) if e.is_cancelled() => {
                // The caller gave up waiting; a later call may attach to the same factory run
                self.claimed.store(false, Ordering::Release);
                Err(ProducerError::Broker(e))
            }
            Err(e) => Err(ProducerError::Broker(e)),
        }
    }

    fn ready<T>(
        &self,
        name: &str,
        init: &SharedAsyncInit<T, BrokerError>,
    ) -> Result<T, ProducerError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let uninitialized = || ProducerError::Uninitialized {
            producer: name.to_string(),
        };
        if !self.initialized.load(Ordering::Acquire) {
            return Err(uninitialized());
        }
        init.get_if_ready().ok_or_else(uninitialized)
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

/// Producer bound to one address
pub struct ProducerHandle {
    name: String,
    configuration: ProducerConfiguration,
    init: SharedAsyncInit<Arc<dyn Producer>, BrokerError>,
    guard: InitGuard,
    observers: Observers,
}

impl ProducerHandle {
    pub fn new(
        name: impl Into<String>,
        connection: ConnectionHandle,
        configuration: ProducerConfiguration,
        observers: Observers,
    ) -> Self {
        let producer_configuration = configuration.clone();
        let init = SharedAsyncInit::new(move |ctx: CancellationContext| async move {
            let connection = connection.get(&ctx).await?;
            connection.create_producer(&producer_configuration, &ctx).await
        });

        Self {
            name: name.into(),
            configuration,
            init,
            guard: InitGuard::default(),
            observers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.configuration.address
    }

    pub fn routing_type(&self) -> Option<RoutingType> {
        self.configuration.routing_type
    }

    pub fn is_initialized(&self) -> bool {
        self.guard.is_initialized()
    }

    /// Create the broker producer; fails with `AlreadyInitialized` on any later call
    pub async fn initialize(&self, ctx: &CancellationContext) -> Result<(), ProducerError> {
        self.guard.run(&self.name, &self.init, ctx).await
    }

    fn context<'a>(&'a self, message: &'a Message) -> MessageContext<'a> {
        MessageContext {
            address: &self.configuration.address,
            routing_type: self.configuration.routing_type,
            queue: None,
            message,
        }
    }

    /// Send and wait for the broker to settle the message
    pub async fn send(
        &self,
        message: &Message,
        ctx: &CancellationContext,
    ) -> Result<(), ProducerError> {
        let producer = self.guard.ready(&self.name, &self.init)?;
        let context = self.context(message);

        self.observers.pre_send(&context);
        producer.send(message, ctx).await?;
        self.observers.post_send(&context);
        Ok(())
    }

    /// Fire-and-forget send
    pub fn send_nowait(&self, message: &Message) -> Result<(), ProducerError> {
        let producer = self.guard.ready(&self.name, &self.init)?;
        let context = self.context(message);

        self.observers.pre_send(&context);
        producer.send_nowait(message)?;
        self.observers.post_send(&context);
        Ok(())
    }
}

#[async_trait]
impl ProducerInitializer for ProducerHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, ctx: &CancellationContext) -> Result<(), ProducerError> {
        ProducerHandle::initialize(self, ctx).await
    }

    async fn dispose(&self) -> BrokerResult<()> {
        match self.init.get_if_ready() {
            Some(producer) => producer.close().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("name", &self.name)
            .field("address", &self.configuration.address)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Producer that names the target address on every send
pub struct AnonymousProducerHandle {
    name: String,
    init: SharedAsyncInit<Arc<dyn AnonymousProducer>, BrokerError>,
    guard: InitGuard,
    observers: Observers,
}

impl AnonymousProducerHandle {
    pub fn new(
        name: impl Into<String>,
        connection: ConnectionHandle,
        configuration: AnonymousProducerConfiguration,
        observers: Observers,
    ) -> Self {
        let init = SharedAsyncInit::new(move |ctx: CancellationContext| async move {
            let connection = connection.get(&ctx).await?;
            connection.create_anonymous_producer(&configuration, &ctx).await
        });

        Self {
            name: name.into(),
            init,
            guard: InitGuard::default(),
            observers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.guard.is_initialized()
    }

    pub async fn initialize(&self, ctx: &CancellationContext) -> Result<(), ProducerError> {
        self.guard.run(&self.name, &self.init, ctx).await
    }

    pub async fn send(
        &self,
        address: &str,
        routing_type: Option<RoutingType>,
        message: &Message,
        ctx: &CancellationContext,
    ) -> Result<(), ProducerError> {
        let producer = self.guard.ready(&self.name, &self.init)?;
        let context = MessageContext {
            address,
            routing_type,
            queue: None,
            message,
        };

        self.observers.pre_send(&context);
        producer.send(address, routing_type, message, ctx).await?;
        self.observers.post_send(&context);
        Ok(())
    }

    pub fn send_nowait(
        &self,
        address: &str,
        routing_type: Option<RoutingType>,
        message: &Message,
    ) -> Result<(), ProducerError> {
        let producer = self.guard.ready(&self.name, &self.init)?;
        let context = MessageContext {
            address,
            routing_type,
            queue: None,
            message,
        };

        self.observers.pre_send(&context);
        producer.send_nowait(address, routing_type, message)?;
        self.observers.post_send(&context);
        Ok(())
    }
}

#[async_trait]
impl ProducerInitializer for AnonymousProducerHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, ctx: &CancellationContext) -> Result<(), ProducerError> {
        AnonymousProducerHandle::initialize(self, ctx).await
    }

    async fn dispose(&self) -> BrokerResult<()> {
        match self.init.get_if_ready() {
            Some(producer) => producer.close().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for AnonymousProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnonymousProducerHandle")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// A [`ProducerHandle`] identified by the marker type `P`
///
/// Marker types let an application register several producers and pick the
/// right one by type: `client.producer::<OrderEvents>()`.
pub struct TypedProducer<P> {
    handle: Arc<ProducerHandle>,
    _marker: PhantomData<fn() -> P>,
}

impl<P> TypedProducer<P> {
    pub(crate) fn new(handle: Arc<ProducerHandle>) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }
}

impl<P> Clone for TypedProducer<P> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.handle))
    }
}

impl<P> Deref for TypedProducer<P> {
    type Target = ProducerHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<P> fmt::Debug for TypedProducer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedProducer").field(&self.handle).finish()
    }
}

/// An [`AnonymousProducerHandle`] identified by the marker type `P`
pub struct TypedAnonymousProducer<P> {
    handle: Arc<AnonymousProducerHandle>,
    _marker: PhantomData<fn() -> P>,
}

impl<P> TypedAnonymousProducer<P> {
    pub(crate) fn new(handle: Arc<AnonymousProducerHandle>) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }
}

impl<P> Clone for TypedAnonymousProducer<P> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.handle))
    }
}

impl<P> Deref for TypedAnonymousProducer<P> {
    type Target = AnonymousProducerHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<P> fmt::Debug for TypedAnonymousProducer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedAnonymousProducer")
            .field(&self.handle)
            .finish()
    }
}
