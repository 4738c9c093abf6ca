//! The calculation kernel: recursive evaluation of [`crate::graph::Graph`]
//! vertices, with memoization and revision-based cache invalidation.

pub mod engine;
pub mod ledger;
pub mod statistic;

pub use engine::CalculationEngine;
pub use ledger::{EvalMode, Memo};
