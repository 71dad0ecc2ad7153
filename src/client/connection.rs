//! Named, lazily established broker connections

use crate::broker::{BrokerError, BrokerResult, Connection, Connector, Endpoint};
use crate::client::error::ClientError;
use crate::core::cancellation::CancellationContext;
use crate::core::lazy::{InitState, SharedAsyncInit};
use crate::core::retry::{retry_async, RetryPolicy};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One logical connection, established on first use and shared by every
/// producer, consumer and topology reconciler registered under its name
#[derive(Clone)]
pub struct ConnectionHandle {
    name: Arc<str>,
    init: Arc<SharedAsyncInit<Arc<dyn Connection>, BrokerError>>,
}

impl ConnectionHandle {
    pub fn new(
        name: impl Into<String>,
        connector: Arc<dyn Connector>,
        endpoints: Vec<Endpoint>,
        retry: RetryPolicy,
    ) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let label = Arc::clone(&name);

        let init = SharedAsyncInit::new(move |ctx: CancellationContext| async move {
            let operation = format!("connect '{}'", label);
            let connection = retry_async(&operation, &retry, &ctx, || {
                connector.connect(&endpoints, &ctx)
            })
            .await?;
            log::info!("Connection '{}' established", label);
            Ok(connection)
        });

        Self {
            name,
            init: Arc::new(init),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared connection, connecting on first call
    pub async fn get(&self, ctx: &CancellationContext) -> BrokerResult<Arc<dyn Connection>> {
        self.init.get(ctx).await
    }

    pub fn get_if_ready(&self) -> Option<Arc<dyn Connection>> {
        self.init.get_if_ready()
    }

    pub fn state(&self) -> InitState {
        self.init.state()
    }

    /// Close the connection if it was ever established
    pub async fn close(&self) -> BrokerResult<()> {
        match self.init.get_if_ready() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.name)
            .field("state", &self.init.state())
            .finish()
    }
}

/// Explicit map of logical connection names to their handles
#[derive(Debug, Clone, Default)]
pub struct ConnectionProvider {
    handles: HashMap<String, ConnectionHandle>,
}

impl ConnectionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ConnectionHandle) -> Result<(), ClientError> {
        if self.handles.contains_key(handle.name()) {
            return Err(ClientError::DuplicateConnection {
                name: handle.name().to_string(),
            });
        }
        self.handles.insert(handle.name().to_string(), handle);
        Ok(())
    }

    pub fn handle(&self, name: &str) -> Option<&ConnectionHandle> {
        self.handles.get(name)
    }

    pub async fn get_connection(
        &self,
        name: &str,
        ctx: &CancellationContext,
    ) -> Result<Arc<dyn Connection>, ClientError> {
        let handle = self
            .handles
            .get(name)
            .ok_or_else(|| ClientError::UnknownConnection {
                name: name.to_string(),
            })?;
        handle
            .get(ctx)
            .await
            .map_err(|e| ClientError::connection(name, e))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    pub fn handles(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
