//! Pluggable numeric operations used by [`crate::graph::vertex::Vertex::Formula`]
//! and [`crate::graph::vertex::Vertex::Metric`] vertices.
//!
//! Strategies register themselves by string key into a process-wide
//! [`StrategyRegistry`] so that a graph bundle loaded from disk can
//! resolve `calculation_type` strings without the caller wiring up
//! trait objects by hand (see DESIGN.md, "Global registries").

use crate::error::CalculationError;
use crate::formula::expr::{DivisionZeroPolicy, Expr};
use std::collections::HashMap;
use std::sync::RwLock;

/// A single operand to a strategy: either a plain value or a
/// `(value, weight)` pair, for strategies like [`WeightedAverage`] that
/// need paired inputs. `None` represents a missing upstream value.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    Value(Option<f64>),
    Weighted(Option<f64>, Option<f64>),
}

/// A named, stateless numeric operation.
///
/// `evaluate` returns `Ok(None)` for a missing result (propagated as a
/// missing marker rather than an error) and `Err` for a hard failure
/// such as division by zero under [`DivisionZeroPolicy::Error`].
/// `division_policy` only matters to [`Division`]; every other
/// strategy ignores it.
pub trait CalculationStrategy: Send + Sync {
    fn key(&self) -> &'static str;
    fn evaluate(&self, inputs: &[Operand], division_policy: DivisionZeroPolicy) -> Result<Option<f64>, CalculationError>;
}

pub struct Addition;
impl CalculationStrategy for Addition {
    fn key(&self) -> &'static str { "add" }
    fn evaluate(&self, inputs: &[Operand], _division_policy: DivisionZeroPolicy) -> Result<Option<f64>, CalculationError> {
        fold_variadic(inputs, 0.0, |acc, v| acc + v)
    }
}

pub struct Subtraction;
impl CalculationStrategy for Subtraction {
    fn key(&self) -> &'static str { "subtract" }
    fn evaluate(&self, inputs: &[Operand], _division_policy: DivisionZeroPolicy) -> Result<Option<f64>, CalculationError> {
        fold_left_associative(inputs, |acc, v| acc - v)
    }
}

pub struct Multiplication;
impl CalculationStrategy for Multiplication {
    fn key(&self) -> &'static str { "multiply" }
    fn evaluate(&self, inputs: &[Operand], _division_policy: DivisionZeroPolicy) -> Result<Option<f64>, CalculationError> {
        fold_variadic(inputs, 1.0, |acc, v| acc * v)
    }
}

pub struct Division;
impl CalculationStrategy for Division {
    fn key(&self) -> &'static str { "divide" }
    fn evaluate(&self, inputs: &[Operand], division_policy: DivisionZeroPolicy) -> Result<Option<f64>, CalculationError> {
        let values = match scalars(inputs) {
            Some(v) => v,
            None => return Ok(None),
        };
        let mut iter = values.into_iter();
        let Some(mut acc) = iter.next() else { return Ok(None) };
        for v in iter {
            if v == 0.0 {
                return match division_policy {
                    DivisionZeroPolicy::Error => Err(CalculationError::DivisionByZero("divide".to_string())),
                    DivisionZeroPolicy::PropagateMissing => Ok(None),
                };
            }
            acc /= v;
        }
        Ok(Some(acc))
    }
}

/// `Σ vᵢwᵢ / Σ wᵢ`; zero total weight or any missing operand ⇒ missing.
pub struct WeightedAverage;
impl CalculationStrategy for WeightedAverage {
    fn key(&self) -> &'static str { "weighted_average" }
    fn evaluate(&self, inputs: &[Operand], _division_policy: DivisionZeroPolicy) -> Result<Option<f64>, CalculationError> {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for op in inputs {
            match op {
                Operand::Weighted(Some(v), Some(w)) => {
                    numerator += v * w;
                    denominator += w;
                }
                Operand::Weighted(_, _) => return Ok(None),
                _ => {
                    return Err(CalculationError::ArityMismatch {
                        strategy: "weighted_average".to_string(),
                        expected: 2,
                        actual: 1,
                    })
                }
            }
        }
        if denominator == 0.0 {
            Ok(None)
        } else {
            Ok(Some(numerator / denominator))
        }
    }
}

/// Evaluates a parsed [`Expr`] against positionally-bound inputs.
pub struct FormulaStrategy {
    pub expr: Expr,
    pub var_names: Vec<String>,
}

impl FormulaStrategy {
    pub fn evaluate_bound(&self, inputs: &[Operand], division_policy: DivisionZeroPolicy) -> Result<Option<f64>, CalculationError> {
        let mut bindings = HashMap::with_capacity(self.var_names.len());
        for (name, op) in self.var_names.iter().zip(inputs) {
            let value = match op {
                Operand::Value(v) => v.unwrap_or(f64::NAN),
                Operand::Weighted(v, _) => v.unwrap_or(f64::NAN),
            };
            bindings.insert(name.clone(), value);
        }
        let result = self.expr.eval(&bindings, division_policy)?;
        Ok(if result.is_nan() { None } else { Some(result) })
    }
}

fn scalars(inputs: &[Operand]) -> Option<Vec<f64>> {
    let mut out = Vec::with_capacity(inputs.len());
    for op in inputs {
        match op {
            Operand::Value(Some(v)) => out.push(*v),
            Operand::Value(None) => return None,
            Operand::Weighted(..) => return None,
        }
    }
    Some(out)
}

fn fold_variadic(
    inputs: &[Operand],
    identity: f64,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Option<f64>, CalculationError> {
    match scalars(inputs) {
        Some(values) => Ok(Some(values.into_iter().fold(identity, f))),
        None => Ok(None),
    }
}

fn fold_left_associative(
    inputs: &[Operand],
    f: impl Fn(f64, f64) -> f64,
) -> Result<Option<f64>, CalculationError> {
    let values = match scalars(inputs) {
        Some(v) => v,
        None => return Ok(None),
    };
    let mut iter = values.into_iter();
    let Some(first) = iter.next() else { return Ok(None) };
    Ok(Some(iter.fold(first, f)))
}

/// Process-wide, name-keyed table of built-in strategies. Populated at
/// startup and treated as frozen thereafter (Design Notes §9); plugin
/// registration is only meaningful before any graph is constructed.
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<&'static str, &'static dyn CalculationStrategy>>,
}

static ADD: Addition = Addition;
static SUB: Subtraction = Subtraction;
static MUL: Multiplication = Multiplication;
static DIV: Division = Division;
static WAVG: WeightedAverage = WeightedAverage;

impl StrategyRegistry {
    fn new() -> Self {
        let mut map: HashMap<&'static str, &'static dyn CalculationStrategy> = HashMap::new();
        map.insert(ADD.key(), &ADD);
        map.insert(SUB.key(), &SUB);
        map.insert(MUL.key(), &MUL);
        map.insert(DIV.key(), &DIV);
        map.insert(WAVG.key(), &WAVG);
        Self { strategies: RwLock::new(map) }
    }

    pub fn global() -> &'static StrategyRegistry {
        use std::sync::OnceLock;
        static INSTANCE: OnceLock<StrategyRegistry> = OnceLock::new();
        INSTANCE.get_or_init(StrategyRegistry::new)
    }

    pub fn get(&self, key: &str) -> Option<&'static dyn CalculationStrategy> {
        self.strategies.read().unwrap().get(key).copied()
    }

    /// Registers a plugin strategy. Intended to run once at process
    /// start, before any graph is built (Design Notes §9).
    pub fn register(&self, strategy: &'static dyn CalculationStrategy) {
        self.strategies.write().unwrap().insert(strategy.key(), strategy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("add")]
    #[case("subtract")]
    #[case("multiply")]
    #[case("divide")]
    #[case("weighted_average")]
    fn builtin_strategies_are_registered(#[case] key: &str) {
        assert!(StrategyRegistry::global().get(key).is_some());
    }

    #[test]
    fn division_by_zero_is_an_error_under_the_default_policy() {
        let div = Division;
        let err = div
            .evaluate(&[Operand::Value(Some(10.0)), Operand::Value(Some(0.0))], DivisionZeroPolicy::Error)
            .unwrap_err();
        assert_eq!(err, CalculationError::DivisionByZero("divide".to_string()));
    }

    #[test]
    fn division_by_zero_is_missing_under_the_opt_in_policy() {
        let div = Division;
        let result = div
            .evaluate(&[Operand::Value(Some(10.0)), Operand::Value(Some(0.0))], DivisionZeroPolicy::PropagateMissing)
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn weighted_average_with_zero_total_weight_is_missing() {
        let wavg = WeightedAverage;
        let result = wavg
            .evaluate(
                &[Operand::Weighted(Some(10.0), Some(0.0)), Operand::Weighted(Some(20.0), Some(0.0))],
                DivisionZeroPolicy::Error,
            )
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn any_missing_operand_makes_addition_missing() {
        let add = Addition;
        let result = add
            .evaluate(&[Operand::Value(Some(1.0)), Operand::Value(None)], DivisionZeroPolicy::Error)
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn subtraction_is_left_associative() {
        let sub = Subtraction;
        let result = sub
            .evaluate(
                &[Operand::Value(Some(10.0)), Operand::Value(Some(3.0)), Operand::Value(Some(2.0))],
                DivisionZeroPolicy::Error,
            )
            .unwrap();
        assert_eq!(result, Some(5.0)); // (10 - 3) - 2
    }
}
