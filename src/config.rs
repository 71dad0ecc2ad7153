//! TOML configuration for the host binary
//!
//! A configuration names the in-memory broker to run, the logical connections
//! to it, the consumers registered on each connection and an optional demo
//! publisher:
//!
//! ```toml
//! [broker]
//! port = 61616
//!
//! [[connections]]
//! name = "main"
//! endpoints = [{ host = "localhost", port = 61616 }]
//! declare_addresses = true
//! declare_queues = true
//! retry = { max_attempts = 5, delay = 200 }
//!
//! [[connections.consumers]]
//! address = "orders"
//! routing_type = "multicast"
//! queue = "orders.billing"
//! options = { concurrent_consumers = 3 }
//!
//! [publisher]
//! connection = "main"
//! address = "orders"
//! count = 20
//! interval = 250
//! ```
//!
//! Every value has a default except connection names, endpoints and addresses.

use crate::broker::memory::BrokerSettings;
use crate::broker::{Endpoint, ProducerOptions, RoutingType};
use crate::client::{ConsumerOptions, QueueOptions};
use crate::core::error_handling::ContextualError;
use crate::core::retry::RetryPolicy;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration used when the host is started without `--config`
pub const DEMO_CONFIG: &str = r#"
[[connections]]
name = "main"
endpoints = [{ host = "localhost", port = 5672 }]
declare_addresses = true
declare_queues = true

[[connections.consumers]]
address = "demo"
routing_type = "anycast"
options = { concurrent_consumers = 2 }

[[connections.consumers]]
address = "demo.events"
routing_type = "multicast"
queue = "demo.events.audit"

[publisher]
connection = "main"
address = "demo"
routing_type = "anycast"
count = 10
interval = 200
"#;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse configuration {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
        }
    }
}

impl ContextualError for ConfigError {
    fn is_user_actionable(&self) -> bool {
        true
    }

    fn user_message(&self) -> Option<String> {
        Some(self.to_string())
    }
}

/// In-memory broker the host runs
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub auto_create_addresses: bool,
    pub auto_create_queues: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let settings = BrokerSettings::default();
        Self {
            host: settings.endpoint.host,
            port: settings.endpoint.port,
            auto_create_addresses: settings.auto_create_addresses,
            auto_create_queues: settings.auto_create_queues,
        }
    }
}

impl BrokerConfig {
    pub fn settings(&self) -> BrokerSettings {
        BrokerSettings {
            endpoint: Endpoint::new(self.host.clone(), self.port),
            auto_create_addresses: self.auto_create_addresses,
            auto_create_queues: self.auto_create_queues,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub declare_addresses: bool,
    #[serde(default)]
    pub declare_queues: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
}

/// One consumer registration; `queue` selects a named queue consumer
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsumerConfig {
    pub address: String,
    pub routing_type: RoutingType,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub options: ConsumerOptions,
    #[serde(default)]
    pub queue_options: QueueOptions,
}

/// Periodic sender driven by the host for demonstration runs
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PublisherConfig {
    pub connection: String,
    pub address: String,
    #[serde(default)]
    pub routing_type: Option<RoutingType>,
    /// Messages to send; 0 keeps sending until shutdown
    #[serde(default)]
    pub count: u64,
    /// Milliseconds between messages
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub options: ProducerOptions,
}

fn default_interval() -> u64 {
    1000
}

impl PublisherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub publisher: Option<PublisherConfig>,
}

impl HostConfig {
    /// Read, parse and validate a configuration file
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        log::debug!("Loaded configuration file {}", path.display());
        Self::parse(&contents, &path.display().to_string())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, "<inline>")
    }

    /// The built-in demo configuration
    pub fn demo() -> Result<Self, ConfigError> {
        Self::parse(DEMO_CONFIG, "<demo>")
    }

    fn parse(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for connection in &self.connections {
            if connection.name.trim().is_empty() {
                return Err(ConfigError::invalid("connection name must not be empty"));
            }
            if !names.insert(connection.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "connection '{}' is defined more than once",
                    connection.name
                )));
            }
            if connection.endpoints.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "connection '{}' has no endpoints",
                    connection.name
                )));
            }
            if connection.retry.max_attempts == 0 {
                return Err(ConfigError::invalid(format!(
                    "connection '{}': retry.max_attempts must be at least 1",
                    connection.name
                )));
            }
            for consumer in &connection.consumers {
                validate_consumer(&connection.name, consumer)?;
            }
        }

        if let Some(publisher) = &self.publisher {
            if self.connection(&publisher.connection).is_none() {
                return Err(ConfigError::invalid(format!(
                    "publisher refers to unknown connection '{}'",
                    publisher.connection
                )));
            }
            if publisher.address.trim().is_empty() {
                return Err(ConfigError::invalid("publisher address must not be empty"));
            }
        }
        Ok(())
    }
}

fn validate_consumer(connection: &str, consumer: &ConsumerConfig) -> Result<(), ConfigError> {
    if consumer.address.trim().is_empty() {
        return Err(ConfigError::invalid(format!(
            "connection '{}': consumer address must not be empty",
            connection
        )));
    }
    if consumer.options.concurrent_consumers == 0 {
        return Err(ConfigError::invalid(format!(
            "connection '{}': consumer on '{}' needs concurrent_consumers >= 1",
            connection, consumer.address
        )));
    }
    if consumer.queue.as_deref().is_some_and(|q| q.trim().is_empty()) {
        return Err(ConfigError::invalid(format!(
            "connection '{}': consumer on '{}' has an empty queue name",
            connection, consumer.address
        )));
    }
    Ok(())
}
