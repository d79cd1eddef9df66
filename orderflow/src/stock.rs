//! Stock availability check.
//!
//! The check is an external dependency of the processing state machine and
//! the designated source of retriable failures. It is injected as a trait
//! object so tests can replace it with a deterministic double.

use crate::config::{LatencyRange, StockSimulationConfig};
use crate::errors::{ProcessingError, ProcessingResult};
use crate::order::Order;
use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

/// Checks that the items of an order can be reserved.
#[async_trait]
pub trait StockChecker: Send + Sync {
    /// Fails with [`ProcessingError::StockUnavailable`] when an item is missing.
    async fn check(&self, order: &Order) -> ProcessingResult<()>;
}

/// Stock checker that never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysInStock;

#[async_trait]
impl StockChecker for AlwaysInStock {
    async fn check(&self, order: &Order) -> ProcessingResult<()> {
        debug!(order_id = %order.id, "stock available");
        Ok(())
    }
}

/// Simulated inventory service with random outages.
///
/// When failure simulation is disabled the check only waits out its latency.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedStockChecker {
    simulate_failures: bool,
    failure_percent: u8,
    latency: LatencyRange,
}

impl SimulatedStockChecker {
    /// Creates a simulated checker from configuration.
    pub fn from_config(config: &StockSimulationConfig) -> Self {
        Self {
            simulate_failures: config.simulate_failures,
            failure_percent: config.failure_percent.into_inner(),
            latency: config.latency,
        }
    }

    fn should_fail(&self) -> bool {
        self.simulate_failures && rand::rng().random_range(0..100u8) < self.failure_percent
    }
}

#[async_trait]
impl StockChecker for SimulatedStockChecker {
    async fn check(&self, order: &Order) -> ProcessingResult<()> {
        debug!(order_id = %order.id, "checking stock");

        if self.should_fail() {
            let item = order.items.first().cloned().unwrap_or_default();
            return Err(ProcessingError::stock_unavailable(&order.id, item));
        }

        tokio::time::sleep(self.latency.sample()).await;
        debug!(order_id = %order.id, "stock available for all items");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePercent;
    use crate::testing::builders::OrderBuilder;

    fn checker(simulate_failures: bool, percent: u8) -> SimulatedStockChecker {
        SimulatedStockChecker::from_config(&StockSimulationConfig {
            simulate_failures,
            failure_percent: FailurePercent::try_new(percent).unwrap(),
            latency: LatencyRange::none(),
        })
    }

    #[tokio::test]
    async fn disabled_simulation_never_fails() {
        let checker = checker(false, 100);
        let order = OrderBuilder::new().build();
        for _ in 0..100 {
            assert!(checker.check(&order).await.is_ok());
        }
    }

    #[tokio::test]
    async fn certain_failure_names_the_first_item() {
        let checker = checker(true, 100);
        let order = OrderBuilder::new().id("O5").items(["A", "B"]).build();
        let error = checker.check(&order).await.unwrap_err();
        assert_eq!(error, ProcessingError::stock_unavailable("O5", "A"));
    }

    #[tokio::test]
    async fn zero_percent_never_fails() {
        let checker = checker(true, 0);
        let order = OrderBuilder::new().build();
        for _ in 0..100 {
            assert!(checker.check(&order).await.is_ok());
        }
    }

    #[tokio::test]
    async fn always_in_stock_accepts_everything() {
        let order = OrderBuilder::new().build();
        assert!(AlwaysInStock.check(&order).await.is_ok());
    }
}
