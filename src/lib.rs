//! A graph-structured financial model engine: named vertices (raw data,
//! formulas, catalog metrics, statistics, and forecasts) wired by
//! declared dependency, evaluated lazily and memoized against a
//! revision counter, with a scenario-adjustment overlay and a
//! structured bundle format for interchange.
//!
//! [`Graph`] is the entry point: build one with `add_data_item`,
//! `add_calculation`, `add_metric`, and `add_forecast`, then read
//! values back with `calculate`/`calculate_adjusted`.

pub mod adjustment;
pub mod calculation;
pub mod canonical;
pub mod catalog;
pub mod error;
pub mod forecast;
pub mod formula;
pub mod graph;
pub mod metric;
pub mod period;
pub mod serialize;

pub use adjustment::{Adjustment, AdjustmentFilter, AdjustmentKind, AdjustmentManager};
pub use calculation::{CalculationEngine, EvalMode};
pub use error::{
    AdjustmentError, CalculationError, EngineError, ForecastError, GraphStructureError, RegistryError,
    SerializationError,
};
pub use forecast::ForecastStrategySpec;
pub use graph::{Graph, MergePolicy, Vertex};
pub use metric::MetricRegistry;
pub use period::{Period, PeriodSequence};
pub use serialize::{GraphBundle, TemplateBundle};
