//! Defines [`Vertex`], the tagged union of quantity kinds the graph can
//! hold, and the small pieces of data each variant carries.
//!
//! A vertex never stores its own computed value (that is the
//! [`crate::calculation::ledger::Ledger`]'s job); it only stores the
//! *recipe* for producing one. This mirrors the teacher's separation
//! of `Node` (topology + recipe) from `Ledger` (results).

use crate::forecast::ForecastStrategySpec;
use crate::formula::expr::Expr;
use crate::period::Period;
use petgraph::graph::NodeIndex;

/// Stable identifier for a vertex inside the underlying `StableDiGraph`.
/// Callers of the public [`crate::graph::Graph`] API address vertices by
/// name; `NodeId` is an internal detail used between `graph` and
/// `calculation`.
pub type NodeId = NodeIndex;

/// How a [`Vertex::Formula`] turns its bound inputs into a result.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaBody {
    /// Dispatches to a registered [`crate::formula::strategy::CalculationStrategy`]
    /// by key (e.g. `"add"`, `"weighted_average"`). Inputs bind positionally.
    Strategy { op_key: String },
    /// A parsed arithmetic expression over named variables, bound
    /// positionally to `inputs` via `var_names`.
    Expression { expr: Expr, var_names: Vec<String> },
}

/// The statistic computed by a [`Vertex::Statistic`] over its window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatisticKind {
    Mean,
    StdDev,
    /// Year-over-year growth: the two-period special case, `periods`
    /// must contain exactly two entries, ordered `[prior, current]`.
    YoyGrowth,
    /// A user-registered statistic function, looked up by key in
    /// `crate::calculation::statistic::StatisticRegistry`.
    Custom(String),
}

/// Shared identifying data every vertex carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexMeta {
    pub name: String,
}

/// The tagged union of quantity kinds a graph vertex can be.
///
/// Evaluation dispatch lives on [`crate::calculation::engine::CalculationEngine`],
/// not here — this enum only describes structure (V1-V4 in spec terms).
#[derive(Debug, Clone, PartialEq)]
pub enum Vertex {
    /// Stores a period-indexed scalar mapping. Missing period -> missing value.
    Data {
        meta: VertexMeta,
        values: std::collections::BTreeMap<Period, f64>,
    },
    /// A calculated quantity over other vertices.
    Formula {
        meta: VertexMeta,
        inputs: Vec<String>,
        body: FormulaBody,
    },
    /// Evaluation-identical to `Formula`; additionally remembers which
    /// catalog entry it was instantiated from, for serialization and
    /// `interpret()` lookups.
    Metric {
        meta: VertexMeta,
        inputs: Vec<String>,
        body: FormulaBody,
        metric_key: String,
    },
    /// A statistic over a fixed window of one input vertex's periods.
    Statistic {
        meta: VertexMeta,
        input: String,
        periods: Vec<Period>,
        stat: StatisticKind,
    },
    /// Synthesizes values beyond the base vertex's historical coverage.
    Forecast {
        meta: VertexMeta,
        base: String,
        base_period: Period,
        horizon: Vec<Period>,
        strategy: ForecastStrategySpec,
    },
}

impl Vertex {
    pub fn meta(&self) -> &VertexMeta {
        match self {
            Vertex::Data { meta, .. }
            | Vertex::Formula { meta, .. }
            | Vertex::Metric { meta, .. }
            | Vertex::Statistic { meta, .. }
            | Vertex::Forecast { meta, .. } => meta,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    /// Declared direct dependencies (V4: never includes transitive inputs).
    pub fn dependencies(&self) -> Vec<&str> {
        match self {
            Vertex::Data { .. } => Vec::new(),
            Vertex::Formula { inputs, .. } | Vertex::Metric { inputs, .. } => {
                inputs.iter().map(String::as_str).collect()
            }
            Vertex::Statistic { input, .. } => vec![input.as_str()],
            Vertex::Forecast { base, .. } => vec![base.as_str()],
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Vertex::Data { .. } => "data",
            Vertex::Formula { .. } => "formula",
            Vertex::Metric { .. } => "metric",
            Vertex::Statistic { .. } => "statistic",
            Vertex::Forecast { .. } => "forecast",
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Vertex::Data { .. })
    }
}
