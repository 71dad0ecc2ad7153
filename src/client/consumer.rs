//! Supervised receive loops
//!
//! Each [`ConsumerRuntime`] owns one broker-side consumer and one background
//! task that feeds messages to the registered handler, strictly one at a time:
//!
//! ```text
//! Created ──start()──► Running ──stop()──► Stopping ──loop drained──► Stopped
//!
//! loop: receive ─► pre_receive ─► handler ─► post_receive ─► receive ...
//!          │                         │
//!          └ cancelled: exit         └ error/panic: log, keep going
//! ```
//!
//! A failing handler never stops the loop. Cancellation, from `stop()` or from
//! the context passed to `start()`, is the only normal way out.

use crate::broker::{
    BrokerError, BrokerResult, Consumer, ConsumerConfiguration, Message, RoutingType,
};
use crate::client::connection::ConnectionHandle;
use crate::client::observers::{MessageContext, Observers};
use crate::client::services::Services;
use crate::core::cancellation::CancellationContext;
use crate::core::lazy::SharedAsyncInit;
use crate::core::sync::lock_recovering;
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Error type handlers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// Message handler shared by every runtime of one registration
pub type MessageHandler =
    Arc<dyn Fn(Message, ConsumerContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message, ConsumerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |message, context| f(message, context).boxed())
}

/// Pause after an unexpected receive failure before trying again
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Everything a handler gets besides the message itself
#[derive(Clone)]
pub struct ConsumerContext {
    consumer: Arc<dyn Consumer>,
    services: Services,
    cancellation: CancellationContext,
    address: Arc<str>,
    queue: Option<Arc<str>>,
    instance: usize,
}

impl ConsumerContext {
    /// Settle `message` as processed
    pub async fn accept(&self, message: &Message) -> BrokerResult<()> {
        self.consumer.accept(message).await
    }

    /// Settle `message` as not processable
    pub async fn reject(&self, message: &Message) -> BrokerResult<()> {
        self.consumer.reject(message).await
    }

    pub fn consumer(&self) -> &Arc<dyn Consumer> {
        &self.consumer
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Cancelled when the runtime is stopping
    pub fn cancellation(&self) -> &CancellationContext {
        &self.cancellation
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Index of the runtime within its registration
    pub fn instance(&self) -> usize {
        self.instance
    }
}

impl fmt::Debug for ConsumerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerContext")
            .field("address", &self.address)
            .field("queue", &self.queue)
            .field("instance", &self.instance)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

type ConsumerInit = SharedAsyncInit<Arc<dyn Consumer>, BrokerError>;

fn consumer_init(
    connection: ConnectionHandle,
    configuration: ConsumerConfiguration,
) -> ConsumerInit {
    SharedAsyncInit::new(move |ctx: CancellationContext| async move {
        let connection = connection.get(&ctx).await?;
        connection.create_consumer(&configuration, &ctx).await
    })
}

pub struct ConsumerRuntime {
    label: String,
    instance: usize,
    configuration: ConsumerConfiguration,
    /// Routing type reported to receive observers
    routing_type: Option<RoutingType>,
    connection: ConnectionHandle,
    /// Replaced when a start is abandoned, so the next start creates a fresh consumer
    consumer: Mutex<Arc<ConsumerInit>>,
    handler: MessageHandler,
    services: Services,
    observers: Observers,
    state: Mutex<ConsumerState>,
    scope: Mutex<Option<CancellationContext>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerRuntime {
    pub fn new(
        connection: ConnectionHandle,
        configuration: ConsumerConfiguration,
        routing_type: Option<RoutingType>,
        instance: usize,
        handler: MessageHandler,
        services: Services,
        observers: Observers,
    ) -> Self {
        let label = match &configuration.queue {
            Some(queue) => format!("{}::{}#{}", configuration.address, queue, instance),
            None => format!("{}#{}", configuration.address, instance),
        };

        let consumer = consumer_init(connection.clone(), configuration.clone());

        Self {
            label,
            instance,
            configuration,
            routing_type,
            connection,
            consumer: Mutex::new(Arc::new(consumer)),
            handler,
            services,
            observers,
            state: Mutex::new(ConsumerState::Created),
            scope: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ConsumerState {
        *lock_recovering(&self.state)
    }

    /// Resolve the broker consumer and spawn the receive loop
    ///
    /// The loop runs in a scope derived from `ctx`; cancelling `ctx` stops it
    /// the same way `stop()` does. Calling `start` on a runtime that is not in
    /// `Created` does nothing. Overlapping calls are serialised, so only the
    /// first of them spawns a loop.
    ///
    /// A start cancelled before the loop is spawned leaves the runtime in
    /// `Created`; the broker consumer it was creating is closed in the
    /// background.
    pub async fn start(&self, ctx: &CancellationContext) -> BrokerResult<()> {
        let mut task = self.task.lock().await;
        if self.state() != ConsumerState::Created {
            log::debug!("Consumer {} already started", self.label);
            return Ok(());
        }

        let scope = ctx.child();
        *lock_recovering(&self.scope) = Some(scope.clone());

        let init = Arc::clone(&*lock_recovering(&self.consumer));
        let consumer = match init.get(&scope).await {
            Ok(consumer) => consumer,
            Err(e) => {
                if scope.is_cancelled() {
                    self.abandon(init);
                }
                return Err(e);
            }
        };

        // stop() only moves a Running runtime, and it cannot be Running
        // while the task lock is held here.
        if scope.is_cancelled() {
            self.abandon(init);
            return Err(BrokerError::Cancelled);
        }
        *lock_recovering(&self.state) = ConsumerState::Running;

        let receive_loop = ReceiveLoop {
            label: self.label.clone(),
            routing_type: self.routing_type,
            handler: Arc::clone(&self.handler),
            observers: self.observers.clone(),
            context: ConsumerContext {
                consumer,
                services: self.services.clone(),
                cancellation: scope,
                address: Arc::from(self.configuration.address.as_str()),
                queue: self.configuration.queue.as_deref().map(Arc::from),
                instance: self.instance,
            },
        };
        *task = Some(tokio::spawn(receive_loop.run()));

        log::info!("Consumer {} started", self.label);
        Ok(())
    }

    /// Close whatever `init` produces and arm a fresh consumer for the next start
    fn abandon(&self, init: Arc<ConsumerInit>) {
        *lock_recovering(&self.consumer) = Arc::new(consumer_init(
            self.connection.clone(),
            self.configuration.clone(),
        ));

        let label = self.label.clone();
        tokio::spawn(async move {
            if let Ok(consumer) = init.get(&CancellationContext::new()).await {
                match consumer.close().await {
                    Ok(()) => log::debug!("Consumer {}: closed after abandoned start", label),
                    Err(e) => log::warn!("Consumer {}: close failed: {}", label, e),
                }
            }
        });
    }

    /// Signal the loop to exit without waiting for it
    pub fn request_stop(&self) {
        if let Some(scope) = lock_recovering(&self.scope).as_ref() {
            scope.cancel();
        }
    }

    /// Cancel the loop and wait until the current handler call has finished
    ///
    /// Returns immediately when the runtime was never started.
    pub async fn stop(&self) {
        let scope = lock_recovering(&self.scope).clone();

        {
            let mut state = lock_recovering(&self.state);
            match *state {
                ConsumerState::Created => {
                    // Abort a start() still resolving its consumer
                    if let Some(scope) = scope {
                        scope.cancel();
                    }
                    return;
                }
                ConsumerState::Running => *state = ConsumerState::Stopping,
                ConsumerState::Stopping | ConsumerState::Stopped => {}
            }
        }

        if let Some(scope) = &scope {
            scope.cancel();
        }

        // Held across the join so concurrent stop() calls all wait for the drain
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_mut() {
            // Cleared only once joined; a stop() dropped mid-wait leaves the handle for the next caller
            let joined = handle.await;
            task.take();
            match joined {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => log::error!("Consumer {} loop terminated abnormally: {}", self.label, e),
            }

            let ready = lock_recovering(&self.consumer).get_if_ready();
            if let Some(consumer) = ready {
                if let Err(e) = consumer.close().await {
                    log::warn!("Consumer {}: close failed: {}", self.label, e);
                }
            }
            log::info!("Consumer {} stopped", self.label);
        }

        *lock_recovering(&self.state) = ConsumerState::Stopped;
    }
}

impl fmt::Debug for ConsumerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRuntime")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

struct ReceiveLoop {
    label: String,
    routing_type: Option<RoutingType>,
    handler: MessageHandler,
    observers: Observers,
    context: ConsumerContext,
}

impl ReceiveLoop {
    async fn run(self) {
        let scope = self.context.cancellation.clone();

        loop {
            let message = match self.context.consumer.receive(&scope).await {
                Ok(message) => message,
                Err(_) if scope.is_cancelled() => break,
                Err(BrokerError::Cancelled) => break,
                Err(e @ BrokerError::Closed { .. }) => {
                    log::warn!("Consumer {}: {}; receive loop exiting", self.label, e);
                    break;
                }
                Err(e) => {
                    log::warn!("Consumer {}: receive failed: {}", self.label, e);
                    if scope
                        .run_until_cancelled(tokio::time::sleep(RECEIVE_RETRY_DELAY))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    continue;
                }
            };

            if !self.dispatch(message).await {
                break;
            }
        }

        log::debug!("Consumer {}: receive loop finished", self.label);
    }

    /// Run the handler for one message; false when the loop should exit
    async fn dispatch(&self, message: Message) -> bool {
        let observed = message.clone();
        let context = MessageContext {
            address: self.context.address(),
            routing_type: self.routing_type,
            queue: self.context.queue(),
            message: &observed,
        };

        self.observers.pre_receive(&context);

        let outcome = AssertUnwindSafe((self.handler)(message, self.context.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.observers.post_receive(&context);
            }
            Ok(Err(_)) if self.context.cancellation.is_cancelled() => return false,
            Ok(Err(e)) => {
                log::error!(
                    "Consumer {}: handler failed for message {}: {}",
                    self.label,
                    describe(&observed),
                    e
                );
            }
            Err(panic) => {
                log::error!(
                    "Consumer {}: handler panicked on message {}: {}",
                    self.label,
                    describe(&observed),
                    panic_message(panic.as_ref())
                );
            }
        }
        true
    }
}

fn describe(message: &Message) -> String {
    match (&message.message_id, message.delivery_tag) {
        (Some(id), _) => id.clone(),
        (None, Some(tag)) => format!("#{}", tag),
        (None, None) => "<untagged>".to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
