//! Serialization of graphs to and from the structured bundle format:
//! a `GraphBundle` (periods, node specs, adjustment records) and the
//! `TemplateBundle` wrapper that adds forecast/preprocessing sections,
//! a metadata block, and a checksum.

pub mod bundle;

pub use bundle::{
    AdjustmentRecord, BundleMeta, ForecastSection, GraphBundle, NodeConfig, NodeSpec,
    PreprocessingSection, PreprocessingStep, TemplateBundle,
};
