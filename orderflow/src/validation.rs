//! Business validation of incoming orders.
//!
//! Rules are checked in a fixed order and validation stops at the first
//! violation, so an order reports exactly one reason.

use crate::errors::{ProcessingError, ProcessingResult};
use crate::order::Order;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Smallest accepted order total (inclusive).
pub const MIN_ORDER_AMOUNT: Decimal = dec!(0.01);
/// Largest accepted order total (inclusive).
pub const MAX_ORDER_AMOUNT: Decimal = dec!(10000.00);

/// Stateless order validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderValidator;

impl OrderValidator {
    /// Creates a validator.
    pub const fn new() -> Self {
        Self
    }

    /// Checks an order against the business rules.
    ///
    /// Fails with [`ProcessingError::Validation`] on the first violated rule:
    /// missing id, missing customer id, no items, total below
    /// [`MIN_ORDER_AMOUNT`] or above [`MAX_ORDER_AMOUNT`].
    pub fn validate(&self, order: &Order) -> ProcessingResult<()> {
        debug!(order_id = %order.id, "validating order");

        if order.id.trim().is_empty() {
            return Err(ProcessingError::validation(&order.id, "order id is required"));
        }

        if order.customer_id.trim().is_empty() {
            return Err(ProcessingError::validation(
                &order.id,
                "customer id is required",
            ));
        }

        if order.items.is_empty() {
            return Err(ProcessingError::validation(
                &order.id,
                "order must contain at least one item",
            ));
        }

        if order.total_amount < MIN_ORDER_AMOUNT {
            return Err(ProcessingError::validation(
                &order.id,
                format!("minimum order amount is {MIN_ORDER_AMOUNT:.2}"),
            ));
        }

        if order.total_amount > MAX_ORDER_AMOUNT {
            return Err(ProcessingError::validation(
                &order.id,
                format!("maximum order amount is {MAX_ORDER_AMOUNT:.2}"),
            ));
        }

        Ok(())
    }
}
