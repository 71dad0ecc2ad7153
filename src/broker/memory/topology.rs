use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::state::BrokerState;
use crate::broker::traits::TopologyManager;
use crate::broker::types::{QueueDeclaration, RoutingType};
use crate::core::cancellation::CancellationContext;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct MemoryTopologyManager {
    state: Arc<BrokerState>,
    closed: AtomicBool,
}

impl MemoryTopologyManager {
    pub(crate) fn open(state: Arc<BrokerState>) -> Self {
        state.open_topology_managers.fetch_add(1, Ordering::AcqRel);
        Self {
            state,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_usable(&self, ctx: &CancellationContext) -> BrokerResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::closed("topology manager"));
        }
        if ctx.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl TopologyManager for MemoryTopologyManager {
    async fn declare_address(
        &self,
        name: &str,
        routing_types: &BTreeSet<RoutingType>,
        ctx: &CancellationContext,
    ) -> BrokerResult<()> {
        self.ensure_usable(ctx)?;
        self.state.declare_address(name, routing_types);
        Ok(())
    }

    async fn list_queue_names(&self, ctx: &CancellationContext) -> BrokerResult<Vec<String>> {
        self.ensure_usable(ctx)?;
        Ok(self.state.queue_names(false))
    }

    async fn create_queue(
        &self,
        declaration: &QueueDeclaration,
        ctx: &CancellationContext,
    ) -> BrokerResult<()> {
        self.ensure_usable(ctx)?;
        self.state.create_queue(declaration, false).map(|_| ())
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.state.open_topology_managers.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl Drop for MemoryTopologyManager {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            log::warn!("Topology manager dropped without being closed");
        }
    }
}
