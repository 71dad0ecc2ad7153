//! Competing-consumer queue backing the in-memory broker
//!
//! Each queue holds deliveries in arrival order. Consumers attached to the
//! same queue compete: a delivery is handed to exactly one of them. A consumer
//! may carry its own selector or a no-local origin, in which case it takes the
//! first delivery it is allowed to see and leaves the rest for others.

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::filter::Selector;
use crate::broker::types::{Message, QueueDeclaration};
use crate::core::sync::lock_recovering;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// A message together with the connection that published it
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub message: Message,
    pub origin_connection: u64,
}

/// What a single consumer is allowed to take from a queue
#[derive(Debug, Default)]
pub(crate) struct TakeFilter {
    pub selector: Option<Selector>,
    /// Skip deliveries published by this connection
    pub exclude_origin: Option<u64>,
}

impl TakeFilter {
    fn admits(&self, delivery: &Delivery) -> bool {
        if self.exclude_origin == Some(delivery.origin_connection) {
            return false;
        }
        self.selector
            .as_ref()
            .is_none_or(|selector| selector.matches(&delivery.message))
    }
}

#[derive(Debug)]
pub(crate) struct MemoryQueue {
    declaration: QueueDeclaration,
    /// Subscription queues created for address-only multicast consumers
    temporary: bool,
    selector: Option<Selector>,
    deliveries: Mutex<VecDeque<Delivery>>,
    available: Notify,
    consumers: AtomicUsize,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl MemoryQueue {
    pub(crate) fn new(declaration: QueueDeclaration, temporary: bool) -> BrokerResult<Self> {
        let selector = declaration
            .filter_expression
            .as_deref()
            .map(Selector::parse)
            .transpose()?;

        Ok(Self {
            declaration,
            temporary,
            selector,
            deliveries: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            consumers: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.declaration.name
    }

    pub(crate) fn declaration(&self) -> &QueueDeclaration {
        &self.declaration
    }

    pub(crate) fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Whether the queue's own filter lets the message in
    pub(crate) fn accepts(&self, message: &Message) -> bool {
        self.selector
            .as_ref()
            .is_none_or(|selector| selector.matches(message))
    }

    pub(crate) fn enqueue(&self, delivery: Delivery) {
        lock_recovering(&self.deliveries).push_back(delivery);
        self.available.notify_waiters();
    }

    fn try_take(&self, filter: &TakeFilter) -> Option<Message> {
        let mut deliveries = lock_recovering(&self.deliveries);
        let position = deliveries.iter().position(|d| filter.admits(d))?;
        deliveries.remove(position).map(|d| d.message)
    }

    /// Wait until a delivery the filter admits is available and take it
    ///
    /// Never returns on its own while the queue stays empty; callers race it
    /// against their cancellation scopes.
    pub(crate) async fn take(&self, filter: &TakeFilter) -> Message {
        loop {
            // Register interest before checking so a concurrent enqueue is not missed
            let notified = self.available.notified();
            if let Some(message) = self.try_take(filter) {
                return message;
            }
            notified.await;
        }
    }

    /// Register a consumer, honouring `max_consumers`
    pub(crate) fn attach_consumer(&self) -> BrokerResult<()> {
        let limit = self
            .declaration
            .max_consumers
            .filter(|max| *max >= 0)
            .map(|max| max as usize);

        self.consumers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match limit {
                Some(max) if current >= max => None,
                _ => Some(current + 1),
            })
            .map(|_| ())
            .map_err(|_| BrokerError::MaxConsumersReached {
                queue: self.declaration.name.clone(),
                max_consumers: self.declaration.max_consumers.unwrap_or(-1),
            })
    }

    /// Unregister a consumer; returns true when it was the last one
    pub(crate) fn detach_consumer(&self) -> bool {
        let previous = self
            .consumers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            })
            .unwrap_or(0);

        let last = previous == 1;
        if last && self.declaration.purge_on_no_consumers == Some(true) {
            let purged = {
                let mut deliveries = lock_recovering(&self.deliveries);
                let count = deliveries.len();
                deliveries.clear();
                count
            };
            if purged > 0 {
                log::debug!(
                    "Purged {} message(s) from queue '{}' after last consumer left",
                    purged,
                    self.declaration.name
                );
            }
        }
        last
    }

    pub(crate) fn depth(&self) -> usize {
        lock_recovering(&self.deliveries).len()
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.consumers.load(Ordering::Acquire)
    }

    pub(crate) fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub(crate) fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
