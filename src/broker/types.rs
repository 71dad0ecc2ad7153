//! Value records exchanged with the broker
//!
//! Everything here is plain, immutable-once-built data: routing types,
//! messages, endpoints and the configuration records consumers, producers and
//! queue declarations are created from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Delivery semantics of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingType {
    /// Point-to-point: each message goes to one queue bound to the address
    Anycast,
    /// Fan-out: each message is copied to every queue bound to the address
    Multicast,
}

impl fmt::Display for RoutingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingType::Anycast => write!(f, "anycast"),
            RoutingType::Multicast => write!(f, "multicast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    Durable,
    Nondurable,
}

/// How producers stamp message ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageIdPolicy {
    /// Leave `message_id` untouched
    #[default]
    None,
    /// `ID:<producer>-<n>` with a per-producer counter
    Sequential,
}

/// A broker message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub body: String,
    pub properties: BTreeMap<String, String>,
    pub message_id: Option<String>,
    pub priority: Option<u8>,
    pub durability: Option<DurabilityMode>,
    pub creation_time: Option<DateTime<Utc>>,
    /// Assigned by the broker when the message is enqueued
    pub delivery_tag: Option<u64>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// A broker endpoint a connection may be established to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: None,
            password: None,
        }
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the password
        match &self.user {
            Some(user) => write!(f, "amqp://{}@{}:{}", user, self.host, self.port),
            None => write!(f, "amqp://{}:{}", self.host, self.port),
        }
    }
}

/// Defaults a producer applies to outgoing messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerOptions {
    pub message_priority: Option<u8>,
    pub message_durability: Option<DurabilityMode>,
    pub set_message_creation_time: bool,
    pub message_id_policy: MessageIdPolicy,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            message_priority: None,
            message_durability: None,
            set_message_creation_time: true,
            message_id_policy: MessageIdPolicy::None,
        }
    }
}

/// What a broker-side consumer attaches to
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfiguration {
    pub address: String,
    pub routing_type: Option<RoutingType>,
    pub queue: Option<String>,
    pub credit: u32,
    pub filter_expression: Option<String>,
    pub no_local_filter: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfiguration {
    pub address: String,
    pub routing_type: Option<RoutingType>,
    pub options: ProducerOptions,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnonymousProducerConfiguration {
    pub options: ProducerOptions,
}

/// Declarative description of a queue the broker must have
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub address: String,
    pub routing_type: RoutingType,
    pub filter_expression: Option<String>,
    pub exclusive: Option<bool>,
    pub group_rebalance: Option<bool>,
    pub group_buckets: Option<i32>,
    /// `-1` or `None` means unlimited
    pub max_consumers: Option<i32>,
    pub auto_create_address: bool,
    pub purge_on_no_consumers: Option<bool>,
}

impl QueueDeclaration {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        routing_type: RoutingType,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            routing_type,
            filter_expression: None,
            exclusive: None,
            group_rebalance: None,
            group_buckets: None,
            max_consumers: None,
            auto_create_address: false,
            purge_on_no_consumers: None,
        }
    }
}
