//! Downstream processing step run after the stock check.

use crate::config::LatencyRange;
use crate::errors::ProcessingResult;
use crate::order::Order;
use async_trait::async_trait;
use tracing::debug;

/// Performs the downstream work for an order whose stock is reserved.
#[async_trait]
pub trait Fulfillment: Send + Sync {
    /// Processes the order. Any error is surfaced to the redelivery layer.
    async fn fulfil(&self, order: &Order) -> ProcessingResult<()>;
}

/// Completes immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateFulfillment;

#[async_trait]
impl Fulfillment for ImmediateFulfillment {
    async fn fulfil(&self, _order: &Order) -> ProcessingResult<()> {
        Ok(())
    }
}

/// Simulates downstream work by waiting a random time.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedFulfillment {
    latency: LatencyRange,
}

impl SimulatedFulfillment {
    /// Creates a simulated step with the given latency.
    pub const fn new(latency: LatencyRange) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Fulfillment for SimulatedFulfillment {
    async fn fulfil(&self, order: &Order) -> ProcessingResult<()> {
        debug!(order_id = %order.id, "processing order");
        tokio::time::sleep(self.latency.sample()).await;
        debug!(order_id = %order.id, "processing finished");
        Ok(())
    }
}
