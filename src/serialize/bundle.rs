//! The graph bundle wire format (§6.1): a flat document of periods,
//! named node specs, and adjustment records, plus the `TemplateBundle`
//! wrapper that adds forecast/preprocessing sections, a metadata block,
//! and a checksum.
//!
//! Node specs mirror the vertex kinds 1:1 except that `Formula` and
//! `Metric` vertices share one shape (`CalculationSpec`) distinguished
//! by the `type` tag (`"formula"` vs `"calculation"`) and the presence
//! of `metric_name`.

use crate::adjustment::{Adjustment, AdjustmentKind};
use crate::error::{EngineError, SerializationError};
use crate::forecast::{Aggregation, Distribution_, ForecastStrategySpec};
use crate::formula::FormulaParser;
use crate::graph::vertex::{FormulaBody, StatisticKind, Vertex, VertexMeta};
use crate::graph::Graph;
use crate::period::Period;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationSpec {
    pub name: String,
    pub inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub formula_variable_names: Option<Vec<String>>,
    pub calculation_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metric_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    Data {
        name: String,
        values: BTreeMap<Period, f64>,
    },
    Formula(CalculationSpec),
    Calculation(CalculationSpec),
    Statistic {
        name: String,
        input: String,
        periods: Vec<Period>,
        stat_key: String,
    },
    Forecast {
        name: String,
        base: String,
        base_period: Period,
        horizon: Vec<Period>,
        strategy_key: String,
        strategy_params: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub id: String,
    pub node_name: String,
    pub period: Period,
    pub value: f64,
    #[serde(rename = "type")]
    pub kind: AdjustmentKind,
    pub priority: i64,
    pub tags: Vec<String>,
    pub scenario: Option<String>,
    pub reason: Option<String>,
}

impl From<Adjustment> for AdjustmentRecord {
    fn from(adj: Adjustment) -> Self {
        Self {
            id: adj.id,
            node_name: adj.vertex_name,
            period: adj.period,
            value: adj.value,
            kind: adj.kind,
            priority: adj.priority,
            tags: adj.tags,
            scenario: adj.scenario,
            reason: adj.reason,
        }
    }
}

impl From<AdjustmentRecord> for Adjustment {
    fn from(rec: AdjustmentRecord) -> Self {
        Self {
            id: rec.id,
            vertex_name: rec.node_name,
            period: rec.period,
            value: rec.value,
            kind: rec.kind,
            priority: rec.priority,
            tags: rec.tags,
            scenario: rec.scenario,
            reason: rec.reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphBundle {
    pub periods: Vec<Period>,
    pub nodes: BTreeMap<String, NodeSpec>,
    pub adjustments: Vec<AdjustmentRecord>,
}

impl GraphBundle {
    /// Snapshots `graph`'s current revision into a bundle. Node order in
    /// `nodes` is `BTreeMap`-sorted by name, not dependency order; the
    /// reverse direction ([`Self::to_graph`]) re-derives an insertion
    /// order that respects declared dependencies.
    pub fn from_graph(graph: &Graph) -> Self {
        let periods = graph.periods().iter().cloned().collect();

        let mut nodes = BTreeMap::new();
        for name in graph.list_nodes(None) {
            let node_id = graph.node_id(name).expect("name came from list_nodes");
            let vertex = graph.vertex_at(node_id);
            nodes.insert(name.to_string(), vertex_to_node_spec(vertex));
        }

        let adjustments = graph.list_adjustments(None).into_iter().cloned().map(AdjustmentRecord::from).collect();

        Self { periods, nodes, adjustments }
    }

    pub fn to_graph(&self) -> Result<Graph, EngineError> {
        let mut graph = Graph::new();
        for period in &self.periods {
            graph.add_period(period.clone())?;
        }
        for name in topological_insertion_order(&self.nodes) {
            let spec = self.nodes.get(&name).expect("name came from this bundle's own keys").clone();
            graph.add_vertex(node_spec_to_vertex(spec)?)?;
        }
        for record in &self.adjustments {
            graph.add_adjustment(record.clone().into())?;
        }
        Ok(graph)
    }
}

/// Best-effort dependency-respecting insertion order (Kahn's algorithm).
/// A node whose dependency never appears among `nodes` (a late-bound
/// reference, A1) is treated as immediately satisfiable. Nodes left
/// over after no further progress is possible form a cycle; they are
/// appended in their remaining order and left for `Graph::validate` to
/// report once loaded.
fn topological_insertion_order(nodes: &BTreeMap<String, NodeSpec>) -> Vec<String> {
    let mut remaining: Vec<String> = nodes.keys().cloned().collect();
    let mut inserted: HashSet<String> = HashSet::new();
    let mut order = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut next_remaining = Vec::new();
        let mut progressed = false;
        for name in remaining {
            let deps = node_spec_dependencies(&nodes[&name]);
            if deps.iter().all(|d| inserted.contains(d) || !nodes.contains_key(d)) {
                inserted.insert(name.clone());
                order.push(name);
                progressed = true;
            } else {
                next_remaining.push(name);
            }
        }
        if !progressed {
            order.extend(next_remaining);
            break;
        }
        remaining = next_remaining;
    }
    order
}

fn node_spec_dependencies(spec: &NodeSpec) -> Vec<String> {
    match spec {
        NodeSpec::Data { .. } => Vec::new(),
        NodeSpec::Formula(cs) | NodeSpec::Calculation(cs) => cs.inputs.clone(),
        NodeSpec::Statistic { input, .. } => vec![input.clone()],
        NodeSpec::Forecast { base, .. } => vec![base.clone()],
    }
}

pub fn vertex_to_node_spec(vertex: &Vertex) -> NodeSpec {
    match vertex {
        Vertex::Data { meta, values } => NodeSpec::Data { name: meta.name.clone(), values: values.clone() },
        Vertex::Formula { meta, inputs, body } => {
            NodeSpec::Formula(calculation_spec(meta.name.clone(), inputs, body, None))
        }
        Vertex::Metric { meta, inputs, body, metric_key } => {
            NodeSpec::Calculation(calculation_spec(meta.name.clone(), inputs, body, Some(metric_key.clone())))
        }
        Vertex::Statistic { meta, input, periods, stat } => NodeSpec::Statistic {
            name: meta.name.clone(),
            input: input.clone(),
            periods: periods.clone(),
            stat_key: stat_key_of(stat),
        },
        Vertex::Forecast { meta, base, base_period, horizon, strategy } => NodeSpec::Forecast {
            name: meta.name.clone(),
            base: base.clone(),
            base_period: base_period.clone(),
            horizon: horizon.clone(),
            strategy_key: strategy.key().to_string(),
            strategy_params: forecast_params(strategy),
        },
    }
}

fn calculation_spec(name: String, inputs: &[String], body: &FormulaBody, metric_name: Option<String>) -> CalculationSpec {
    match body {
        FormulaBody::Strategy { op_key } => CalculationSpec {
            name,
            inputs: inputs.to_vec(),
            formula: None,
            formula_variable_names: None,
            calculation_type: op_key.clone(),
            metric_name,
        },
        FormulaBody::Expression { expr, var_names } => CalculationSpec {
            name,
            inputs: inputs.to_vec(),
            formula: Some(expr.to_string()),
            formula_variable_names: Some(var_names.clone()),
            calculation_type: "expression".to_string(),
            metric_name,
        },
    }
}

fn stat_key_of(stat: &StatisticKind) -> String {
    match stat {
        StatisticKind::Mean => "mean".to_string(),
        StatisticKind::StdDev => "stddev".to_string(),
        StatisticKind::YoyGrowth => "yoy_growth".to_string(),
        StatisticKind::Custom(key) => key.clone(),
    }
}

fn stat_kind_of(key: &str) -> StatisticKind {
    match key {
        "mean" => StatisticKind::Mean,
        "stddev" => StatisticKind::StdDev,
        "yoy_growth" => StatisticKind::YoyGrowth,
        other => StatisticKind::Custom(other.to_string()),
    }
}

/// Parameters for a forecast strategy, kept separate from `strategy_key`
/// (Design Notes §9: built-in strategies round-trip through a plain
/// key/params pair rather than `ForecastStrategySpec`'s own derived
/// `Serialize`, so the wire shape doesn't depend on Rust variant names).
fn forecast_params(spec: &ForecastStrategySpec) -> serde_json::Value {
    match spec {
        ForecastStrategySpec::FixedGrowth { rate } => json!({ "rate": rate }),
        ForecastStrategySpec::Curve { rates } => json!({ "rates": rates }),
        ForecastStrategySpec::Statistical { distribution, seed } => json!({ "distribution": distribution, "seed": seed }),
        ForecastStrategySpec::HistoricalAverageGrowth { aggregation } => json!({ "aggregation": aggregation }),
        ForecastStrategySpec::AverageValue { aggregation } => json!({ "aggregation": aggregation }),
        ForecastStrategySpec::Custom { handle } => json!({ "handle": handle }),
    }
}

fn forecast_spec(key: &str, params: &serde_json::Value) -> Result<ForecastStrategySpec, SerializationError> {
    fn field(params: &serde_json::Value, name: &str) -> Result<serde_json::Value, SerializationError> {
        params
            .get(name)
            .cloned()
            .ok_or_else(|| SerializationError::SchemaError(format!("forecast params missing '{name}'")))
    }
    fn parse<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T, SerializationError> {
        serde_json::from_value(value).map_err(|e| SerializationError::SchemaError(e.to_string()))
    }

    match key {
        "fixed-growth" => Ok(ForecastStrategySpec::FixedGrowth { rate: parse(field(params, "rate")?)? }),
        "curve" => Ok(ForecastStrategySpec::Curve { rates: parse(field(params, "rates")?)? }),
        "statistical" => Ok(ForecastStrategySpec::Statistical {
            distribution: parse::<Distribution_>(field(params, "distribution")?)?,
            seed: parse(field(params, "seed")?)?,
        }),
        "historical-average-growth" => Ok(ForecastStrategySpec::HistoricalAverageGrowth {
            aggregation: parse::<Aggregation>(field(params, "aggregation")?)?,
        }),
        "average-value" => {
            Ok(ForecastStrategySpec::AverageValue { aggregation: parse::<Aggregation>(field(params, "aggregation")?)? })
        }
        "custom" => Ok(ForecastStrategySpec::Custom { handle: parse(field(params, "handle")?)? }),
        other => Err(SerializationError::SchemaError(format!("unknown forecast strategy key '{other}'"))),
    }
}

fn calculation_body(spec: &CalculationSpec) -> Result<FormulaBody, SerializationError> {
    match &spec.formula {
        Some(src) => {
            let expr = FormulaParser::parse(src).map_err(|e| SerializationError::SchemaError(e.to_string()))?;
            let var_names = spec.formula_variable_names.clone().unwrap_or_else(|| expr.free_vars());
            Ok(FormulaBody::Expression { expr, var_names })
        }
        None => Ok(FormulaBody::Strategy { op_key: spec.calculation_type.clone() }),
    }
}

pub fn node_spec_to_vertex(spec: NodeSpec) -> Result<Vertex, SerializationError> {
    match spec {
        NodeSpec::Data { name, values } => Ok(Vertex::Data { meta: VertexMeta { name }, values }),
        NodeSpec::Formula(cs) => {
            let body = calculation_body(&cs)?;
            Ok(Vertex::Formula { meta: VertexMeta { name: cs.name }, inputs: cs.inputs, body })
        }
        NodeSpec::Calculation(cs) => {
            let metric_key = cs
                .metric_name
                .clone()
                .ok_or_else(|| SerializationError::SchemaError("'calculation' node is missing 'metric_name'".to_string()))?;
            let body = calculation_body(&cs)?;
            Ok(Vertex::Metric { meta: VertexMeta { name: cs.name }, inputs: cs.inputs, body, metric_key })
        }
        NodeSpec::Statistic { name, input, periods, stat_key } => {
            Ok(Vertex::Statistic { meta: VertexMeta { name }, input, periods, stat: stat_kind_of(&stat_key) })
        }
        NodeSpec::Forecast { name, base, base_period, horizon, strategy_key, strategy_params } => {
            let strategy = forecast_spec(&strategy_key, &strategy_params)?;
            Ok(Vertex::Forecast { meta: VertexMeta { name }, base, base_period, horizon, strategy })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMeta {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSection {
    pub periods: Vec<Period>,
    pub node_configs: Vec<NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingStep {
    pub name: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingSection {
    pub pipeline: Vec<PreprocessingStep>,
}

/// A graph spec plus optional forecast/preprocessing configuration, a
/// metadata block, and an integrity checksum — the unit a model
/// template catalog stores and distributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateBundle {
    #[serde(flatten)]
    pub graph: GraphBundle,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub forecast: Option<ForecastSection>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub preprocessing: Option<PreprocessingSection>,
    pub meta: BundleMeta,
    pub checksum: String,
}

impl TemplateBundle {
    /// Builds a bundle and stamps it with its own checksum.
    pub fn new(
        graph: GraphBundle,
        forecast: Option<ForecastSection>,
        preprocessing: Option<PreprocessingSection>,
        meta: BundleMeta,
    ) -> Result<Self, SerializationError> {
        let mut bundle = Self { graph, forecast, preprocessing, meta, checksum: String::new() };
        bundle.checksum = bundle.compute_checksum()?;
        Ok(bundle)
    }

    /// SHA-256 over the canonicalized document: every field except
    /// `checksum` itself, compacted to a whitespace-free JSON string.
    fn compute_checksum(&self) -> Result<String, SerializationError> {
        let mut value = serde_json::to_value(self).map_err(|e| SerializationError::SchemaError(e.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("checksum");
        }
        let canonical = serde_json::to_string(&value).map_err(|e| SerializationError::SchemaError(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn verify_checksum(&self) -> Result<(), SerializationError> {
        let computed = self.compute_checksum()?;
        if computed != self.checksum {
            return Err(SerializationError::ChecksumMismatch { expected: self.checksum.clone(), computed });
        }
        Ok(())
    }
}
