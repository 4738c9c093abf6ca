//! Recursive, memoizing evaluator for [`crate::graph::Graph`].
//!
//! Grounded on the teacher's `ComputationEngine`: a DFS that builds
//! topological order on the fly while guarding against cycles with a
//! `visiting`/`visited` pair, generalized from a single "compute all
//! targets" bulk pass to on-demand `value(name, period)` resolution
//! with two evaluation modes.

use crate::calculation::ledger::EvalMode;
use crate::calculation::statistic::{self, StatisticRegistry};
use crate::error::{CalculationError, EngineError, ForecastError, GraphStructureError, RegistryError};
use crate::formula::strategy::{FormulaStrategy, Operand, StrategyRegistry};
use crate::formula::DivisionZeroPolicy;
use crate::graph::vertex::{FormulaBody, StatisticKind, Vertex};
use crate::graph::Graph;
use crate::period::Period;
/// Recursion stack, in call order, for cycle-path reporting. A `Vec`
/// rather than a `HashSet` because the reported path must preserve the
/// order vertices were entered, not just membership.
type VisitStack = Vec<String>;

pub struct CalculationEngine<'a> {
    graph: &'a Graph,
}

impl<'a> CalculationEngine<'a> {
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    pub fn calculate(&self, name: &str, period: &Period, mode: EvalMode) -> Result<Option<f64>, EngineError> {
        self.eval(name, period, mode, &mut Vec::new())
    }

    fn eval(&self, name: &str, period: &Period, mode: EvalMode, visiting: &mut VisitStack) -> Result<Option<f64>, EngineError> {
        let revision = self.graph.revision();
        if let Some(cached) = self.graph.memo_get(name, period, revision, mode) {
            return cached;
        }

        if let Some(start) = visiting.iter().position(|n| n == name) {
            let mut path = visiting[start..].to_vec();
            path.push(name.to_string());
            let result: Result<Option<f64>, EngineError> = Err(GraphStructureError::CyclicDependency { path }.into());
            return result;
        }
        visiting.push(name.to_string());

        let node_id = match self.graph.node_id(name) {
            Some(id) => id,
            None => {
                visiting.pop();
                let result: Result<Option<f64>, EngineError> = Err(GraphStructureError::UnknownVertex(name.to_string()).into());
                self.graph.memo_insert(name, period, revision, mode, result.clone());
                return result;
            }
        };
        let vertex = self.graph.vertex_at(node_id).clone();

        let base = self.compute_base(&vertex, period, mode, visiting);
        visiting.pop();

        let result = match (base, mode) {
            (Ok(Some(value)), EvalMode::Adjusted) => {
                let (adjusted, _) = self.graph.adjustments().apply(name, period, value);
                Ok(Some(adjusted))
            }
            (other, _) => other,
        };

        self.graph.memo_insert(name, period, revision, mode, result.clone());
        result
    }

    fn compute_base(&self, vertex: &Vertex, period: &Period, mode: EvalMode, visiting: &mut VisitStack) -> Result<Option<f64>, EngineError> {
        match vertex {
            Vertex::Data { values, .. } => Ok(values.get(period).copied()),

            Vertex::Formula { inputs, body, .. } | Vertex::Metric { inputs, body, .. } => {
                self.evaluate_formula_body(body, inputs, period, mode, visiting)
            }

            Vertex::Statistic { input, periods, stat, .. } => self.evaluate_statistic(input, periods, stat, mode, visiting),

            Vertex::Forecast { base, base_period, horizon, strategy, .. } => {
                self.evaluate_forecast(base, base_period, horizon, strategy, period, mode, visiting)
            }
        }
    }

    fn evaluate_formula_body(
        &self,
        body: &FormulaBody,
        inputs: &[String],
        period: &Period,
        mode: EvalMode,
        visiting: &mut VisitStack,
    ) -> Result<Option<f64>, EngineError> {
        let division_policy = self.graph.division_policy();
        match body {
            FormulaBody::Strategy { op_key } => {
                let strategy = StrategyRegistry::global()
                    .get(op_key)
                    .ok_or_else(|| RegistryError::UnknownStrategy(op_key.clone()))?;

                let mut operands = Vec::with_capacity(inputs.len());
                if op_key == "weighted_average" {
                    for pair in inputs.chunks(2) {
                        let value = self.eval(&pair[0], period, mode, visiting)?;
                        let weight = match pair.get(1) {
                            Some(name) => self.eval(name, period, mode, visiting)?,
                            None => return Err(CalculationError::ArityMismatch { strategy: op_key.clone(), expected: 2, actual: 1 }.into()),
                        };
                        operands.push(Operand::Weighted(value, weight));
                    }
                } else {
                    for name in inputs {
                        operands.push(Operand::Value(self.eval(name, period, mode, visiting)?));
                    }
                }
                Ok(strategy.evaluate(&operands, division_policy)?)
            }
            FormulaBody::Expression { expr, var_names } => {
                let mut operands = Vec::with_capacity(var_names.len());
                for name in inputs.iter().take(var_names.len()) {
                    operands.push(Operand::Value(self.eval(name, period, mode, visiting)?));
                }
                let bound = FormulaStrategy { expr: expr.clone(), var_names: var_names.clone() };
                Ok(bound.evaluate_bound(&operands, division_policy)?)
            }
        }
    }

    fn evaluate_statistic(
        &self,
        input: &str,
        periods: &[Period],
        stat: &StatisticKind,
        mode: EvalMode,
        visiting: &mut VisitStack,
    ) -> Result<Option<f64>, EngineError> {
        let mut values = Vec::with_capacity(periods.len());
        for p in periods {
            if let Some(v) = self.eval(input, p, mode, visiting)? {
                values.push(v);
            }
        }

        let result = match stat {
            StatisticKind::Mean => statistic::mean(&values),
            StatisticKind::StdDev => statistic::stdev(&values),
            StatisticKind::YoyGrowth => statistic::yoy_growth(&values),
            StatisticKind::Custom(key) => StatisticRegistry::global()
                .compute(key, &values)
                .ok_or_else(|| RegistryError::UnknownStrategy(key.clone()))?,
        };
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_forecast(
        &self,
        base: &str,
        base_period: &Period,
        horizon: &[Period],
        strategy: &crate::forecast::ForecastStrategySpec,
        period: &Period,
        mode: EvalMode,
        visiting: &mut VisitStack,
    ) -> Result<Option<f64>, EngineError> {
        if self.period_at_or_before_base(period, base_period) {
            return self.eval(base, period, mode, visiting);
        }

        let horizon_index = horizon.iter().position(|p| p == period);
        let Some(idx) = horizon_index else {
            return Err(ForecastError::InvalidHorizon(format!("period '{period}' is not in the forecast horizon")).into());
        };

        let mut history = Vec::new();
        for p in self.graph.periods().iter() {
            if self.period_at_or_before_base(p, base_period) {
                if let Some(v) = self.eval(base, p, mode, visiting)? {
                    history.push(v);
                }
            }
        }
        if history.is_empty() {
            if let Some(v) = self.eval(base, base_period, mode, visiting)? {
                history.push(v);
            }
        }

        let value = strategy.project(&history, idx + 1)?;
        Ok(Some(value))
    }

    fn period_at_or_before_base(&self, period: &Period, base_period: &Period) -> bool {
        match (self.graph.periods().position(period), self.graph.periods().position(base_period)) {
            (Some(p), Some(b)) => p <= b,
            _ => period <= base_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastStrategySpec;
    use crate::graph::vertex::StatisticKind;

    fn periods(years: &[&str]) -> Vec<Period> {
        years.iter().map(|y| Period::new(*y)).collect()
    }

    #[test]
    fn forecast_delegates_to_base_within_historical_range() {
        let mut graph = Graph::new();
        for p in periods(&["2023", "2024", "2025", "2026"]) {
            graph.add_period(p).unwrap();
        }
        graph
            .add_data_item("Revenue", [(Period::new("2024"), 1000.0), (Period::new("2025"), 1100.0)].into())
            .unwrap();
        graph
            .add_forecast(
                "RevenueFcst",
                "Revenue",
                Period::new("2025"),
                vec![Period::new("2026")],
                ForecastStrategySpec::FixedGrowth { rate: 0.05 },
            )
            .unwrap();

        assert_eq!(graph.calculate("RevenueFcst", &Period::new("2024")).unwrap(), Some(1000.0));
        let projected = graph.calculate("RevenueFcst", &Period::new("2026")).unwrap().unwrap();
        assert!((projected - 1155.0).abs() < 1e-9);
    }

    #[test]
    fn forecast_rejects_period_outside_horizon() {
        let mut graph = Graph::new();
        for p in periods(&["2024", "2025", "2026", "2027"]) {
            graph.add_period(p).unwrap();
        }
        graph.add_data_item("Revenue", [(Period::new("2025"), 1000.0)].into()).unwrap();
        graph
            .add_forecast(
                "RevenueFcst",
                "Revenue",
                Period::new("2025"),
                vec![Period::new("2026")],
                ForecastStrategySpec::FixedGrowth { rate: 0.05 },
            )
            .unwrap();

        let err = graph.calculate("RevenueFcst", &Period::new("2027")).unwrap_err();
        assert!(matches!(err, EngineError::Forecast(ForecastError::InvalidHorizon(_))));
    }

    #[test]
    fn statistic_mean_aggregates_over_declared_window() {
        let mut graph = Graph::new();
        for p in periods(&["2023", "2024", "2025"]) {
            graph.add_period(p).unwrap();
        }
        graph
            .add_data_item(
                "Revenue",
                [(Period::new("2023"), 100.0), (Period::new("2024"), 200.0), (Period::new("2025"), 300.0)].into(),
            )
            .unwrap();
        graph
            .add_vertex(crate::graph::vertex::Vertex::Statistic {
                meta: crate::graph::vertex::VertexMeta { name: "RevenueMean".to_string() },
                input: "Revenue".to_string(),
                periods: periods(&["2023", "2024", "2025"]),
                stat: StatisticKind::Mean,
            })
            .unwrap();

        assert_eq!(graph.calculate("RevenueMean", &Period::new("2025")).unwrap(), Some(200.0));
    }

    #[test]
    fn weighted_average_binds_value_weight_pairs_positionally() {
        let mut graph = Graph::new();
        graph.add_period(Period::new("2024")).unwrap();
        graph.add_data_item("SegmentA", [(Period::new("2024"), 10.0)].into()).unwrap();
        graph.add_data_item("WeightA", [(Period::new("2024"), 1.0)].into()).unwrap();
        graph.add_data_item("SegmentB", [(Period::new("2024"), 20.0)].into()).unwrap();
        graph.add_data_item("WeightB", [(Period::new("2024"), 3.0)].into()).unwrap();
        graph
            .add_calculation(
                "Blended",
                vec!["SegmentA".into(), "WeightA".into(), "SegmentB".into(), "WeightB".into()],
                "weighted_average",
                None,
            )
            .unwrap();

        let result = graph.calculate("Blended", &Period::new("2024")).unwrap().unwrap();
        assert!((result - 17.5).abs() < 1e-9);
    }

    #[test]
    fn cycle_in_unvalidated_graph_is_caught_at_calculate_time() {
        let mut graph = Graph::new();
        graph.add_period(Period::new("2024")).unwrap();
        graph
            .add_vertex(Vertex::Formula {
                meta: crate::graph::vertex::VertexMeta { name: "A".to_string() },
                inputs: vec!["B".to_string()],
                body: FormulaBody::Strategy { op_key: "add".to_string() },
            })
            .unwrap();
        graph
            .add_vertex(Vertex::Formula {
                meta: crate::graph::vertex::VertexMeta { name: "B".to_string() },
                inputs: vec!["A".to_string()],
                body: FormulaBody::Strategy { op_key: "add".to_string() },
            })
            .unwrap();

        let err = graph.calculate("A", &Period::new("2024")).unwrap_err();
        assert!(matches!(err, EngineError::GraphStructure(GraphStructureError::CyclicDependency { .. })));
    }
}
