//! Send and receive observation hooks
//!
//! Observers are notified around every successful send and every handled
//! message. They cannot fail the operation they observe.

use crate::broker::{Message, RoutingType};
use std::sync::Arc;

/// What an observer is told about a message passing through the client
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub address: &'a str,
    pub routing_type: Option<RoutingType>,
    /// Set for messages received from a named queue
    pub queue: Option<&'a str>,
    pub message: &'a Message,
}

pub trait SendObserver: Send + Sync {
    fn pre_send(&self, _context: &MessageContext<'_>) {}
    fn post_send(&self, _context: &MessageContext<'_>) {}
}

pub trait ReceiveObserver: Send + Sync {
    fn pre_receive(&self, _context: &MessageContext<'_>) {}
    fn post_receive(&self, _context: &MessageContext<'_>) {}
}

/// Observers registered on one connection
#[derive(Clone, Default)]
pub struct Observers {
    send: Vec<Arc<dyn SendObserver>>,
    receive: Vec<Arc<dyn ReceiveObserver>>,
}

impl Observers {
    pub fn add_send(&mut self, observer: Arc<dyn SendObserver>) {
        self.send.push(observer);
    }

    pub fn add_receive(&mut self, observer: Arc<dyn ReceiveObserver>) {
        self.receive.push(observer);
    }

    pub(crate) fn pre_send(&self, context: &MessageContext<'_>) {
        self.send.iter().for_each(|o| o.pre_send(context));
    }

    pub(crate) fn post_send(&self, context: &MessageContext<'_>) {
        self.send.iter().for_each(|o| o.post_send(context));
    }

    pub(crate) fn pre_receive(&self, context: &MessageContext<'_>) {
        self.receive.iter().for_each(|o| o.pre_receive(context));
    }

    pub(crate) fn post_receive(&self, context: &MessageContext<'_>) {
        self.receive.iter().for_each(|o| o.post_receive(context));
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("send", &self.send.len())
            .field("receive", &self.receive.len())
            .finish()
    }
}
