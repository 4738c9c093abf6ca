//! `Graph`: the primary data structure for a financial model.
//!
//! Holds the vertex topology (`StableDiGraph`), a name index, the
//! period sequence, the adjustment overlay, a revision counter, and the
//! evaluation memo. This mirrors the teacher's `ComputationGraph`
//! columnar split of topology from data, generalized from
//! constant/formula nodes to the five [`Vertex`] kinds and from a
//! `NodeId`-keyed ledger to the name/period-keyed [`Memo`].

use super::vertex::{NodeId, Vertex};
use crate::adjustment::{Adjustment, AdjustmentFilter, AdjustmentManager};
use crate::calculation::engine::CalculationEngine;
use crate::calculation::ledger::{EvalMode, Memo};
use crate::canonical::CanonicalNameRegistry;
use crate::error::{EngineError, GraphStructureError};
use crate::forecast::ForecastStrategySpec;
use crate::formula::{DivisionZeroPolicy, Expr, FormulaParser};
use crate::graph::vertex::{FormulaBody, VertexMeta};
use crate::metric::MetricRegistry;
use crate::period::{Period, PeriodSequence};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

/// Collision policy for [`Graph::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    Reject,
    KeepSelf,
    Replace,
    RenameOther,
}

pub struct Graph {
    pub(crate) vertices: StableDiGraph<Vertex, ()>,
    name_index: HashMap<String, NodeId>,
    periods: PeriodSequence,
    adjustments: AdjustmentManager,
    revision: u64,
    memo: RwLock<Memo>,
    division_policy: DivisionZeroPolicy,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            vertices: StableDiGraph::new(),
            name_index: HashMap::new(),
            periods: PeriodSequence::new(),
            adjustments: AdjustmentManager::new(),
            revision: 0,
            memo: RwLock::new(Memo::new()),
            division_policy: DivisionZeroPolicy::Error,
        }
    }

    /// Sets how a zero divisor is handled by formula/strategy evaluation
    /// (default: fails with `DivisionByZero`). Bumps the revision since
    /// it can change previously memoized results.
    pub fn set_division_policy(&mut self, policy: DivisionZeroPolicy) {
        self.division_policy = policy;
        self.bump_revision();
    }

    fn bump_revision(&mut self) {
        self.revision += 1;
        log::debug!("graph revision bumped to {}", self.revision);
    }

    // ---- internal accessors used by calculation::engine ----

    pub(crate) fn node_id(&self, name: &str) -> Option<NodeId> {
        self.name_index.get(name).copied()
    }

    pub(crate) fn vertex_at(&self, id: NodeId) -> &Vertex {
        self.vertices.node_weight(id).expect("node_id came from name_index")
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn periods(&self) -> &PeriodSequence {
        &self.periods
    }

    pub(crate) fn adjustments(&self) -> &AdjustmentManager {
        &self.adjustments
    }

    pub(crate) fn division_policy(&self) -> DivisionZeroPolicy {
        self.division_policy
    }

    pub(crate) fn memo_get(&self, name: &str, period: &Period, revision: u64, mode: EvalMode) -> Option<Result<Option<f64>, EngineError>> {
        self.memo.read().unwrap().get(name, period, revision, mode).cloned()
    }

    pub(crate) fn memo_insert(&self, name: &str, period: &Period, revision: u64, mode: EvalMode, value: Result<Option<f64>, EngineError>) {
        self.memo.write().unwrap().insert(name, period, revision, mode, value);
    }

    // ---- mutation surface ----

    pub fn contains(&self, name: &str) -> bool {
        self.name_index.contains_key(name)
    }

    /// Registers `period` in the graph's period sequence. A no-op on
    /// repeated insertion of an already-known period (not a mutation).
    pub fn add_period(&mut self, period: Period) -> Result<(), EngineError> {
        if self.periods.insert(period) {
            self.bump_revision();
        }
        Ok(())
    }

    fn insert_new_vertex(&mut self, vertex: Vertex) -> Result<(), GraphStructureError> {
        let name = vertex.name().to_string();
        if self.name_index.contains_key(&name) {
            return Err(GraphStructureError::DuplicateVertex(name));
        }
        let node_id = self.vertices.add_node(vertex);
        self.name_index.insert(name, node_id);
        self.link_dependencies(node_id);
        self.bump_revision();
        Ok(())
    }

    /// Adds edges from each currently-known dependency to `node_id`.
    /// Dependencies declared before their dependent exists in the graph
    /// are simply unlinked until `validate()` is run; this mirrors the
    /// late-binding allowance already granted to adjustments (A1).
    fn link_dependencies(&mut self, node_id: NodeId) {
        let deps: Vec<String> = self
            .vertices
            .node_weight(node_id)
            .expect("just inserted")
            .dependencies()
            .into_iter()
            .map(str::to_string)
            .collect();
        for dep in deps {
            if let Some(&dep_id) = self.name_index.get(&dep) {
                self.vertices.add_edge(dep_id, node_id, ());
            }
        }
    }

    /// Generic vertex insertion. The per-kind helpers below (`add_data_item`,
    /// `add_calculation`, `add_metric`, `add_forecast`) build a [`Vertex`]
    /// and delegate here.
    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<(), EngineError> {
        Ok(self.insert_new_vertex(vertex)?)
    }

    pub fn add_data_item(&mut self, name: impl Into<String>, values: BTreeMap<Period, f64>) -> Result<(), EngineError> {
        let name = name.into();
        self.add_vertex(Vertex::Data { meta: VertexMeta { name }, values })
    }

    /// Alias for [`Self::add_data_item`].
    pub fn add_data_vertex(&mut self, name: impl Into<String>, values: BTreeMap<Period, f64>) -> Result<(), EngineError> {
        self.add_data_item(name, values)
    }

    /// `input_names` must be ordered to match `formula`'s variables
    /// one-to-one when `formula` is supplied (each formula variable is
    /// expected to name its bound input vertex directly).
    pub fn add_calculation(
        &mut self,
        name: impl Into<String>,
        input_names: Vec<String>,
        op_key: impl Into<String>,
        formula: Option<&str>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        let body = match formula {
            Some(src) => {
                let expr: Expr = FormulaParser::parse(src).map_err(EngineError::Calculation)?;
                let var_names = expr.free_vars();
                FormulaBody::Expression { expr, var_names }
            }
            None => FormulaBody::Strategy { op_key: op_key.into() },
        };
        self.add_vertex(Vertex::Formula { meta: VertexMeta { name }, inputs: input_names, body })
    }

    pub fn add_metric(&mut self, metric_key: &str, registry: &MetricRegistry, canonical: &CanonicalNameRegistry) -> Result<(), EngineError> {
        let vertex = registry.instantiate(metric_key, self, canonical)?;
        self.add_vertex(vertex)
    }

    pub fn add_forecast(
        &mut self,
        name: impl Into<String>,
        base: impl Into<String>,
        base_period: Period,
        horizon: Vec<Period>,
        strategy: ForecastStrategySpec,
    ) -> Result<(), EngineError> {
        self.add_vertex(Vertex::Forecast {
            meta: VertexMeta { name: name.into() },
            base: base.into(),
            base_period,
            horizon,
            strategy,
        })
    }

    pub fn set_value(&mut self, name: &str, period: Period, value: f64) -> Result<(), EngineError> {
        let node_id = self.node_id(name).ok_or_else(|| GraphStructureError::UnknownVertex(name.to_string()))?;
        match self.vertices.node_weight_mut(node_id) {
            Some(Vertex::Data { values, .. }) => {
                values.insert(period, value);
                self.bump_revision();
                Ok(())
            }
            _ => Err(GraphStructureError::NotADataVertex(name.to_string()).into()),
        }
    }

    /// Replaces an existing vertex's recipe, keeping its identity (edges
    /// are rebuilt from the new recipe's declared dependencies). Fails if
    /// `name` is unknown or if `new_vertex.name() != name`.
    pub fn replace(&mut self, name: &str, new_vertex: Vertex) -> Result<(), EngineError> {
        if new_vertex.name() != name {
            return Err(GraphStructureError::StrategyMismatch {
                vertex: name.to_string(),
                strategy: new_vertex.kind_name().to_string(),
                reason: "replacement vertex must keep the same name".to_string(),
            }
            .into());
        }
        let node_id = self.node_id(name).ok_or_else(|| GraphStructureError::UnknownVertex(name.to_string()))?;
        let edge_ids: Vec<_> = self.vertices.edges_directed(node_id, petgraph::Direction::Incoming).map(|e| e.id()).collect();
        for edge_id in edge_ids {
            self.vertices.remove_edge(edge_id);
        }
        *self.vertices.node_weight_mut(node_id).expect("looked up by name_index") = new_vertex;
        self.link_dependencies(node_id);
        self.bump_revision();
        Ok(())
    }

    pub fn remove(&mut self, name: &str, force: bool) -> Result<(), EngineError> {
        let node_id = self.node_id(name).ok_or_else(|| GraphStructureError::UnknownVertex(name.to_string()))?;
        let dependents = self.vertices.neighbors_directed(node_id, petgraph::Direction::Outgoing).count();
        if dependents > 0 && !force {
            return Err(GraphStructureError::DependentsRemain { vertex: name.to_string(), dependents }.into());
        }
        self.vertices.remove_node(node_id);
        self.name_index.remove(name);
        self.memo.write().unwrap().clear_vertex(name);
        self.bump_revision();
        Ok(())
    }

    pub fn add_adjustment(&mut self, adj: Adjustment) -> Result<(), EngineError> {
        self.adjustments.add(adj)?;
        self.bump_revision();
        Ok(())
    }

    pub fn remove_adjustment(&mut self, id: &str) -> Result<(), EngineError> {
        self.adjustments.remove(id)?;
        self.bump_revision();
        Ok(())
    }

    pub fn list_adjustments(&self, filter: Option<AdjustmentFilter>) -> Vec<&Adjustment> {
        match filter {
            Some(f) => self.adjustments.filter(f),
            None => self.adjustments.list(None),
        }
    }

    pub fn clear_cache(&self, name: Option<&str>) {
        let mut memo = self.memo.write().unwrap();
        match name {
            Some(n) => memo.clear_vertex(n),
            None => memo.clear_all(),
        }
    }

    // ---- query surface ----

    pub fn calculate(&self, name: &str, period: &Period) -> Result<Option<f64>, EngineError> {
        CalculationEngine::new(self).calculate(name, period, EvalMode::Base)
    }

    pub fn calculate_adjusted(&self, name: &str, period: &Period) -> Result<Option<f64>, EngineError> {
        CalculationEngine::new(self).calculate(name, period, EvalMode::Adjusted)
    }

    /// Evaluates every vertex at `period` in topological order, collecting
    /// per-vertex outcomes rather than failing wholesale (§7).
    pub fn calculate_all(&self, period: &Period) -> Result<HashMap<String, Result<Option<f64>, EngineError>>, EngineError> {
        let order = self.topological_order()?;
        let engine = CalculationEngine::new(self);
        let mut out = HashMap::with_capacity(order.len());
        for name in order {
            let result = engine.calculate(&name, period, EvalMode::Base);
            out.insert(name, result);
        }
        Ok(out)
    }

    pub fn get_dependencies(&self, name: &str) -> Result<Vec<String>, EngineError> {
        let node_id = self.node_id(name).ok_or_else(|| GraphStructureError::UnknownVertex(name.to_string()))?;
        Ok(self.vertex_at(node_id).dependencies().into_iter().map(str::to_string).collect())
    }

    pub fn get_dependents(&self, name: &str) -> Result<Vec<String>, EngineError> {
        let node_id = self.node_id(name).ok_or_else(|| GraphStructureError::UnknownVertex(name.to_string()))?;
        Ok(self
            .vertices
            .neighbors_directed(node_id, petgraph::Direction::Outgoing)
            .map(|id| self.vertex_at(id).name().to_string())
            .collect())
    }

    pub fn topological_order(&self) -> Result<Vec<String>, EngineError> {
        match petgraph::algo::toposort(&self.vertices, None) {
            Ok(order) => Ok(order.into_iter().map(|id| self.vertex_at(id).name().to_string()).collect()),
            Err(cycle) => {
                let path = self.cycle_path_from(cycle.node_id());
                Err(GraphStructureError::CyclicDependency { path }.into())
            }
        }
    }

    /// DFS-based cycle detection, grounded on the teacher's
    /// `ComputationEngine::build_eval_order_dfs` visiting/visited guard.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        let mut cycles = Vec::new();
        for node_id in self.vertices.node_indices() {
            if !visited.contains(&node_id) {
                self.dfs_find_cycles(node_id, &mut visiting, &mut visited, &mut Vec::new(), &mut cycles);
            }
        }
        cycles
    }

    fn dfs_find_cycles(
        &self,
        node_id: NodeId,
        visiting: &mut HashSet<NodeId>,
        visited: &mut HashSet<NodeId>,
        stack: &mut Vec<NodeId>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visiting.insert(node_id);
        stack.push(node_id);
        for dep_id in self.vertices.neighbors_directed(node_id, petgraph::Direction::Incoming) {
            if visiting.contains(&dep_id) {
                let start = stack.iter().position(|&id| id == dep_id).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].iter().map(|&id| self.vertex_at(id).name().to_string()).collect();
                path.push(self.vertex_at(dep_id).name().to_string());
                cycles.push(path);
            } else if !visited.contains(&dep_id) {
                self.dfs_find_cycles(dep_id, visiting, visited, stack, cycles);
            }
        }
        stack.pop();
        visiting.remove(&node_id);
        visited.insert(node_id);
    }

    fn cycle_path_from(&self, start: NodeId) -> Vec<String> {
        let mut visiting = HashSet::new();
        let mut stack = Vec::new();
        self.dfs_first_cycle(start, &mut visiting, &mut stack).unwrap_or_else(|| vec![self.vertex_at(start).name().to_string()])
    }

    fn dfs_first_cycle(&self, node_id: NodeId, visiting: &mut HashSet<NodeId>, stack: &mut Vec<NodeId>) -> Option<Vec<String>> {
        if visiting.contains(&node_id) {
            let start = stack.iter().position(|&id| id == node_id).unwrap_or(0);
            let mut path: Vec<String> = stack[start..].iter().map(|&id| self.vertex_at(id).name().to_string()).collect();
            path.push(self.vertex_at(node_id).name().to_string());
            return Some(path);
        }
        visiting.insert(node_id);
        stack.push(node_id);
        for dep_id in self.vertices.neighbors_directed(node_id, petgraph::Direction::Incoming) {
            if let Some(path) = self.dfs_first_cycle(dep_id, visiting, stack) {
                return Some(path);
            }
        }
        stack.pop();
        visiting.remove(&node_id);
        None
    }

    /// Collects structural issues without raising: unknown input
    /// references, cycles, and unknown strategy/statistic/forecast
    /// handles. Recoverable by design (§7): the caller decides what to
    /// do with the list.
    pub fn validate(&self) -> Vec<EngineError> {
        let mut issues = Vec::new();

        for node_id in self.vertices.node_indices() {
            let vertex = self.vertex_at(node_id);
            for dep in vertex.dependencies() {
                if !self.name_index.contains_key(dep) {
                    issues.push(
                        GraphStructureError::MissingInput { vertex: vertex.name().to_string(), input: dep.to_string() }.into(),
                    );
                }
            }
            match vertex {
                Vertex::Formula { body: FormulaBody::Strategy { op_key }, .. }
                | Vertex::Metric { body: FormulaBody::Strategy { op_key }, .. } => {
                    if crate::formula::StrategyRegistry::global().get(op_key).is_none() {
                        issues.push(crate::error::RegistryError::UnknownStrategy(op_key.clone()).into());
                    }
                }
                Vertex::Statistic { stat: crate::graph::vertex::StatisticKind::Custom(key), .. } => {
                    if crate::calculation::statistic::StatisticRegistry::global().compute(key, &[]).is_none() {
                        issues.push(crate::error::RegistryError::UnknownStrategy(key.clone()).into());
                    }
                }
                Vertex::Forecast { strategy: ForecastStrategySpec::Custom { handle }, .. } => {
                    if self.custom_forecast_handle_missing(handle) {
                        issues.push(crate::error::ForecastError::UnknownForecastStrategy(handle.clone()).into());
                    }
                }
                _ => {}
            }
        }

        for cycle in self.detect_cycles() {
            issues.push(GraphStructureError::CyclicDependency { path: cycle }.into());
        }

        issues
    }

    fn custom_forecast_handle_missing(&self, handle: &str) -> bool {
        crate::forecast::CustomForecastRegistry::global().call(handle, &[0.0], 1).is_err()
    }

    pub fn list_nodes(&self, filter: Option<&dyn Fn(&Vertex) -> bool>) -> Vec<&str> {
        self.vertices
            .node_weights()
            .filter(|v| filter.map_or(true, |f| f(v)))
            .map(|v| v.name())
            .collect()
    }

    /// Unions periods, vertices, and adjustments from `other` into
    /// `self`. On a vertex name collision or an adjustment id collision,
    /// applies `policy` uniformly.
    pub fn merge(&mut self, other: Graph, policy: MergePolicy) -> Result<(), EngineError> {
        for period in other.periods.iter().cloned() {
            self.add_period(period)?;
        }

        let other_names: Vec<String> = other.vertices.node_weights().map(|v| v.name().to_string()).collect();
        for name in other_names {
            let other_id = other.node_id(&name).expect("just collected from other's vertices");
            let other_vertex = other.vertex_at(other_id).clone();

            if !self.contains(&name) {
                self.add_vertex(other_vertex)?;
                continue;
            }

            match policy {
                MergePolicy::Reject => return Err(GraphStructureError::DuplicateVertex(name).into()),
                MergePolicy::KeepSelf => {}
                MergePolicy::Replace => self.replace(&name, other_vertex)?,
                MergePolicy::RenameOther => {
                    let renamed_name = format!("{name}_other");
                    let renamed = rename_vertex(other_vertex, renamed_name);
                    self.add_vertex(renamed)?;
                }
            }
        }

        let other_adjustments: Vec<Adjustment> = other.adjustments.list(None).into_iter().cloned().collect();
        for adj in other_adjustments {
            if self.adjustments.contains_id(&adj.id) {
                match policy {
                    MergePolicy::Reject => {
                        return Err(crate::error::AdjustmentError::DuplicateAdjustment(adj.id).into())
                    }
                    MergePolicy::KeepSelf => continue,
                    MergePolicy::Replace => self.adjustments.remove(&adj.id)?,
                    MergePolicy::RenameOther => {
                        let mut renamed = adj;
                        renamed.id = format!("{}_other", renamed.id);
                        self.add_adjustment(renamed)?;
                        continue;
                    }
                }
            }
            self.add_adjustment(adj)?;
        }

        Ok(())
    }
}

fn rename_vertex(vertex: Vertex, new_name: String) -> Vertex {
    match vertex {
        Vertex::Data { values, .. } => Vertex::Data { meta: VertexMeta { name: new_name }, values },
        Vertex::Formula { inputs, body, .. } => Vertex::Formula { meta: VertexMeta { name: new_name }, inputs, body },
        Vertex::Metric { inputs, body, metric_key, .. } => {
            Vertex::Metric { meta: VertexMeta { name: new_name }, inputs, body, metric_key }
        }
        Vertex::Statistic { input, periods, stat, .. } => {
            Vertex::Statistic { meta: VertexMeta { name: new_name }, input, periods, stat }
        }
        Vertex::Forecast { base, base_period, horizon, strategy, .. } => {
            Vertex::Forecast { meta: VertexMeta { name: new_name }, base, base_period, horizon, strategy }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> Graph {
        let mut graph = Graph::new();
        graph.add_period(Period::new("2024")).unwrap();
        graph.add_period(Period::new("2025")).unwrap();
        graph
            .add_data_item("Revenue", [(Period::new("2024"), 1000.0), (Period::new("2025"), 1100.0)].into())
            .unwrap();
        graph
            .add_data_item("COGS", [(Period::new("2024"), 400.0), (Period::new("2025"), 440.0)].into())
            .unwrap();
        graph
            .add_calculation("GrossProfit", vec!["Revenue".into(), "COGS".into()], "subtract", None)
            .unwrap();
        graph
    }

    #[test]
    fn scenario_1_formula_over_data_with_mutation() {
        let _ = env_logger::try_init();
        let mut graph = sample_graph();
        assert_eq!(graph.calculate("GrossProfit", &Period::new("2024")).unwrap(), Some(600.0));
        assert_eq!(graph.calculate("GrossProfit", &Period::new("2025")).unwrap(), Some(660.0));

        graph.set_value("COGS", Period::new("2024"), 500.0).unwrap();
        assert_eq!(graph.calculate("GrossProfit", &Period::new("2024")).unwrap(), Some(500.0));
    }

    #[test]
    fn scenario_2_adjustment_propagates_through_formula() {
        let mut graph = sample_graph();
        graph
            .add_adjustment(Adjustment {
                id: "rev-bump".to_string(),
                vertex_name: "Revenue".to_string(),
                period: Period::new("2025"),
                value: 1.15,
                kind: crate::adjustment::AdjustmentKind::Multiplicative,
                priority: 0,
                tags: vec![],
                scenario: None,
                reason: None,
            })
            .unwrap();

        let result = graph.calculate_adjusted("GrossProfit", &Period::new("2025")).unwrap();
        assert!((result.unwrap() - 825.0).abs() < 1e-9);
    }

    #[test]
    fn division_by_zero_fails_under_the_default_policy_but_propagates_missing_once_opted_in() {
        use crate::formula::DivisionZeroPolicy;

        let mut graph = Graph::new();
        graph.add_period(Period::new("2024")).unwrap();
        graph.add_data_item("Revenue", [(Period::new("2024"), 100.0)].into()).unwrap();
        graph.add_data_item("Shares", [(Period::new("2024"), 0.0)].into()).unwrap();
        graph
            .add_calculation("PerShare", vec!["Revenue".into(), "Shares".into()], "", Some("Revenue / Shares"))
            .unwrap();

        let err = graph.calculate("PerShare", &Period::new("2024")).unwrap_err();
        assert!(matches!(err, EngineError::Calculation(crate::error::CalculationError::DivisionByZero(_))));

        graph.set_division_policy(DivisionZeroPolicy::PropagateMissing);
        assert_eq!(graph.calculate("PerShare", &Period::new("2024")).unwrap(), None);
    }

    #[test]
    fn validate_reports_cycle() {
        let mut graph = Graph::new();
        graph.add_period(Period::new("2024")).unwrap();
        graph.add_vertex(Vertex::Formula {
            meta: VertexMeta { name: "A".to_string() },
            inputs: vec!["B".to_string()],
            body: FormulaBody::Strategy { op_key: "add".to_string() },
        }).unwrap();
        graph.add_vertex(Vertex::Formula {
            meta: VertexMeta { name: "B".to_string() },
            inputs: vec!["A".to_string()],
            body: FormulaBody::Strategy { op_key: "add".to_string() },
        }).unwrap();

        let issues = graph.validate();
        assert!(issues.iter().any(|e| matches!(e, EngineError::GraphStructure(GraphStructureError::CyclicDependency { .. }))));
    }

    #[test]
    fn remove_without_force_fails_when_dependents_remain() {
        let graph = sample_graph();
        let mut graph = graph;
        let err = graph.remove("Revenue", false).unwrap_err();
        assert!(matches!(err, EngineError::GraphStructure(GraphStructureError::DependentsRemain { .. })));
    }

    #[test]
    fn remove_with_force_leaves_dependents_failing_on_next_calculate() {
        let mut graph = sample_graph();
        graph.remove("Revenue", true).unwrap();
        let err = graph.calculate("GrossProfit", &Period::new("2024")).unwrap_err();
        assert!(matches!(err, EngineError::GraphStructure(GraphStructureError::UnknownVertex(_))));
    }

    #[test]
    fn merge_with_reject_policy_fails_on_name_collision() {
        let mut a = sample_graph();
        let b = sample_graph();
        let err = a.merge(b, MergePolicy::Reject).unwrap_err();
        assert!(matches!(err, EngineError::GraphStructure(GraphStructureError::DuplicateVertex(_))));
    }

    #[test]
    fn merge_with_keep_self_policy_is_a_no_op_on_collision() {
        let mut a = sample_graph();
        a.set_value("COGS", Period::new("2024"), 999.0).unwrap();
        let b = sample_graph();
        a.merge(b, MergePolicy::KeepSelf).unwrap();
        assert_eq!(a.calculate("GrossProfit", &Period::new("2024")).unwrap(), Some(1.0));
    }

    fn colliding_adjustment(value: f64) -> Adjustment {
        Adjustment {
            id: "shared".to_string(),
            vertex_name: "Revenue".to_string(),
            period: Period::new("2024"),
            value,
            kind: AdjustmentKind::Additive,
            priority: 0,
            tags: vec![],
            scenario: None,
            reason: None,
        }
    }

    #[test]
    fn merge_rejects_duplicate_adjustment_id_under_reject_policy() {
        // Distinct vertex names so the vertex-collision branch of `merge`
        // never fires; only the adjustment ids collide here.
        let mut a = Graph::new();
        a.add_period(Period::new("2024")).unwrap();
        a.add_data_item("Revenue", [(Period::new("2024"), 1000.0)].into()).unwrap();
        a.add_adjustment(colliding_adjustment(10.0)).unwrap();

        let mut b = Graph::new();
        b.add_period(Period::new("2024")).unwrap();
        b.add_data_item("OtherRevenue", [(Period::new("2024"), 500.0)].into()).unwrap();
        b.add_adjustment(colliding_adjustment(20.0)).unwrap();

        let err = a.merge(b, MergePolicy::Reject).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Adjustment(crate::error::AdjustmentError::DuplicateAdjustment(_))
        ));
    }

    #[test]
    fn merge_keep_self_policy_discards_other_adjustment_on_id_collision() {
        let mut a = sample_graph();
        a.add_adjustment(colliding_adjustment(10.0)).unwrap();
        let mut b = sample_graph();
        b.add_adjustment(colliding_adjustment(20.0)).unwrap();

        a.merge(b, MergePolicy::KeepSelf).unwrap();
        let stored = a.list_adjustments(None);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, 10.0);
    }

    #[test]
    fn merge_replace_policy_overwrites_adjustment_on_id_collision() {
        let mut a = sample_graph();
        a.add_adjustment(colliding_adjustment(10.0)).unwrap();
        let mut b = sample_graph();
        b.add_adjustment(colliding_adjustment(20.0)).unwrap();

        a.merge(b, MergePolicy::Replace).unwrap();
        let stored = a.list_adjustments(None);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, 20.0);
    }

    #[test]
    fn merge_rename_other_policy_keeps_both_adjustments_under_distinct_ids() {
        let mut a = sample_graph();
        a.add_adjustment(colliding_adjustment(10.0)).unwrap();
        let mut b = sample_graph();
        b.add_adjustment(colliding_adjustment(20.0)).unwrap();

        a.merge(b, MergePolicy::RenameOther).unwrap();
        let mut ids: Vec<&str> = a.list_adjustments(None).iter().map(|adj| adj.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["shared", "shared_other"]);
    }

    #[test]
    fn metric_vertex_calculates_and_interprets_through_the_graph() {
        use crate::canonical::CanonicalNameRegistry;
        use crate::metric::{MetricDefinition, MetricRegistry, Rating};

        let mut graph = Graph::new();
        graph.add_period(Period::new("2024")).unwrap();
        graph.add_data_item("current_assets", [(Period::new("2024"), 400.0)].into()).unwrap();
        graph.add_data_item("current_liabilities", [(Period::new("2024"), 200.0)].into()).unwrap();

        let mut metrics = MetricRegistry::new();
        metrics
            .register(MetricDefinition {
                name: "current_ratio".to_string(),
                description: None,
                inputs: vec!["current_assets".to_string(), "current_liabilities".to_string()],
                formula: "current_assets / current_liabilities".to_string(),
                category: Some("liquidity".to_string()),
                tags: vec![],
                units: None,
                interpretation: Some(crate::metric::InterpretationThresholds {
                    good_range: Some((1.5, 3.0)),
                    warning_below: Some(1.0),
                    warning_above: None,
                    excellent_above: None,
                    poor_below: Some(0.5),
                    notes: None,
                }),
            })
            .unwrap();
        let canonical = CanonicalNameRegistry::new();
        graph.add_metric("current_ratio", &metrics, &canonical).unwrap();

        let value = graph.calculate("current_ratio", &Period::new("2024")).unwrap().unwrap();
        assert_eq!(value, 2.0);
        assert_eq!(metrics.interpret("current_ratio", value).unwrap().rating, Rating::Good);
    }

    /// Scenario 5 wording: `validate()` must report `CyclicDependency`
    /// for a cycle, and must NOT report one when there isn't any,
    /// across a spread of randomly generated small dependency chains.
    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn linear_chain_graph(length: usize, close_the_loop: bool) -> Graph {
            let mut graph = Graph::new();
            graph.add_period(Period::new("2024")).unwrap();
            let names: Vec<String> = (0..length).map(|i| format!("V{i}")).collect();
            for (i, name) in names.iter().enumerate() {
                let inputs = if i == 0 {
                    if close_the_loop && length > 1 {
                        vec![names[length - 1].clone()]
                    } else {
                        vec![]
                    }
                } else {
                    vec![names[i - 1].clone()]
                };
                let vertex = if inputs.is_empty() {
                    Vertex::Data { meta: VertexMeta { name: name.clone() }, values: Default::default() }
                } else {
                    Vertex::Formula { meta: VertexMeta { name: name.clone() }, inputs, body: FormulaBody::Strategy { op_key: "add".to_string() } }
                };
                graph.add_vertex(vertex).unwrap();
            }
            graph
        }

        proptest! {
            #[test]
            fn validate_reports_cycle_iff_one_was_built(length in 2usize..8, close_the_loop: bool) {
                let graph = linear_chain_graph(length, close_the_loop);
                let has_cycle_issue = graph
                    .validate()
                    .iter()
                    .any(|e| matches!(e, EngineError::GraphStructure(GraphStructureError::CyclicDependency { .. })));
                prop_assert_eq!(has_cycle_issue, close_the_loop);
            }

            /// After any sequence of `set_value` mutations, the memoized
            /// result must match a graph built fresh with the same final
            /// values — no stale pre-mutation value may leak through.
            #[test]
            fn cached_value_never_outlives_the_mutation_that_invalidates_it(
                cogs_values in proptest::collection::vec(1.0f64..900.0, 1..6),
            ) {
                let mut mutated = sample_graph();
                for v in &cogs_values {
                    mutated.set_value("COGS", Period::new("2024"), *v).unwrap();
                    let _ = mutated.calculate("GrossProfit", &Period::new("2024")).unwrap();
                }
                let last = *cogs_values.last().unwrap();

                let mut fresh = sample_graph();
                fresh.set_value("COGS", Period::new("2024"), last).unwrap();

                prop_assert_eq!(
                    mutated.calculate("GrossProfit", &Period::new("2024")).unwrap(),
                    fresh.calculate("GrossProfit", &Period::new("2024")).unwrap(),
                );
            }
        }
    }
}
