//! Testing utilities for the order pipeline.
//!
//! Available to unit tests and, with the `testing` feature, to downstream
//! crates.
//!
//! - [`builders`]: fluent builders for orders and consumed records
//! - [`doubles`]: deterministic replacements for the pipeline's collaborators
//! - [`generators`]: `proptest` strategies for orders
//!
//! ```rust,ignore
//! use orderflow::testing::prelude::*;
//!
//! let order = OrderBuilder::new().id("O1").build();
//! let message = MessageBuilder::for_order(&order).offset(3).build();
//! ```

pub mod builders;
pub mod doubles;
pub mod generators;

/// Convenient imports for tests.
pub mod prelude {
    pub use super::builders::{MessageBuilder, OrderBuilder};
    pub use super::doubles::{
        FailingFulfillment, RecordingProducer, RecordingReporter, ScriptedHandler,
        ScriptedSource, ScriptedStockChecker,
    };
    pub use super::generators::{arb_out_of_range_amount, arb_valid_order};
}
