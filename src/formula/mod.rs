//! Formula parsing and evaluation: the expression language used by
//! `Formula`/`Metric` vertices, and the pluggable strategy dispatch
//! used by both formula-bound and strategy-bound calculations.

pub mod expr;
pub mod parser;
pub mod strategy;

pub use expr::{DivisionZeroPolicy, Expr};
pub use parser::FormulaParser;
pub use strategy::{CalculationStrategy, Operand, StrategyRegistry};
