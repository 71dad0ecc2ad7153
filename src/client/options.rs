//! Registration options for consumers and declared queues

use serde::{Deserialize, Serialize};

/// How a consumer registration attaches to the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Independent receive loops created for the registration
    pub concurrent_consumers: usize,
    /// Flow-control window granted to each broker-side consumer
    pub credit: u32,
    pub filter_expression: Option<String>,
    /// Do not deliver messages published on the same connection
    pub no_local_filter: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            concurrent_consumers: 1,
            credit: 200,
            filter_expression: None,
            no_local_filter: false,
        }
    }
}

impl ConsumerOptions {
    pub fn with_concurrent_consumers(mut self, count: usize) -> Self {
        self.concurrent_consumers = count;
        self
    }
}

/// Queue settings used when queue declaration is enabled
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    pub exclusive: Option<bool>,
    pub group_rebalance: Option<bool>,
    pub group_buckets: Option<i32>,
    pub max_consumers: Option<i32>,
    pub auto_create_address: bool,
    pub purge_on_no_consumers: Option<bool>,
    pub filter_expression: Option<String>,
}
