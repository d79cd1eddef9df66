//! Property test generators for orders.

use crate::order::{Order, OrderStatus};
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Generates orders that pass validation.
pub fn arb_valid_order() -> impl Strategy<Value = Order> {
    (
        "[A-Za-z0-9-]{1,36}",
        "CUST-[0-9]{1,4}",
        prop::collection::vec("[A-Za-z0-9]{1,12}", 1..5),
        1i64..=1_000_000,
        0i64..=4_102_444_800_000,
    )
        .prop_map(|(id, customer_id, items, cents, timestamp)| Order {
            id,
            customer_id,
            items,
            total_amount: Decimal::new(cents, 2),
            status: OrderStatus::Pending,
            timestamp,
        })
}

/// Generates amounts outside the accepted order range.
pub fn arb_out_of_range_amount() -> impl Strategy<Value = Decimal> {
    prop_oneof![
        (-1_000_000i64..=0).prop_map(|cents| Decimal::new(cents, 2)),
        (1_000_001i64..=100_000_000).prop_map(|cents| Decimal::new(cents, 2)),
    ]
}
