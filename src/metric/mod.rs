//! Declarative catalog of canonical metric formulas, resolved into
//! `Formula`-kind [`crate::graph::vertex::Vertex::Metric`] vertices.

use crate::canonical::CanonicalNameRegistry;
use crate::catalog;
use crate::error::{EngineError, RegistryError};
use crate::formula::{Expr, FormulaParser};
use crate::graph::vertex::{FormulaBody, Vertex, VertexMeta};
use crate::graph::Graph;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterpretationThresholds {
    #[serde(default)]
    pub good_range: Option<(f64, f64)>,
    #[serde(default)]
    pub warning_below: Option<f64>,
    #[serde(default)]
    pub warning_above: Option<f64>,
    #[serde(default)]
    pub excellent_above: Option<f64>,
    #[serde(default)]
    pub poor_below: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Excellent,
    Good,
    Warning,
    Poor,
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub rating: Rating,
    pub message: String,
}

/// One declarative metric catalog entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Input names, ordered to match `formula`'s free variables one-to-one
    /// in their first-occurrence order: the first variable the parsed
    /// expression names binds to `inputs[0]`, the second to `inputs[1]`,
    /// and so on. Declaring these out of order silently binds the wrong
    /// vertex rather than failing — there is no name-based cross-check
    /// between a variable token and the input it resolves to.
    pub inputs: Vec<String>,
    pub formula: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub interpretation: Option<InterpretationThresholds>,
}

/// Declarative catalog of metric definitions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    definitions: HashMap<String, MetricDefinition>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, defn: MetricDefinition) -> Result<(), RegistryError> {
        if self.definitions.contains_key(&defn.name) {
            return Err(RegistryError::DuplicateRegistration(defn.name.clone()));
        }
        self.definitions.insert(defn.name.clone(), defn);
        Ok(())
    }

    pub fn load_catalog(src: &str) -> Result<Self, crate::error::SerializationError> {
        let defs: Vec<MetricDefinition> = catalog::load_records(src)?;
        let mut registry = Self::new();
        for def in defs {
            registry
                .register(def)
                .map_err(|e| crate::error::SerializationError::SchemaError(e.to_string()))?;
        }
        Ok(registry)
    }

    pub fn get(&self, key: &str) -> Result<&MetricDefinition, RegistryError> {
        self.definitions
            .get(key)
            .ok_or_else(|| RegistryError::UnknownMetric(key.to_string()))
    }

    pub fn list(&self, category: Option<&str>) -> Vec<&str> {
        self.definitions
            .values()
            .filter(|d| category.map_or(true, |c| d.category.as_deref() == Some(c)))
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Resolves each input name through the canonical registry against
    /// the graph's vertices and instantiates a `Metric`-kind vertex. On
    /// success the vertex is not yet inserted into `graph` — callers add
    /// it via [`Graph::add_vertex`] so mutation stays centralized there.
    pub fn instantiate(
        &self,
        key: &str,
        graph: &Graph,
        canonical: &CanonicalNameRegistry,
    ) -> Result<Vertex, EngineError> {
        let defn = self.get(key)?;

        let mut resolved_inputs = Vec::with_capacity(defn.inputs.len());
        let mut missing = Vec::new();
        for input in &defn.inputs {
            let canonical_name = canonical.standardize(input).canonical;
            if graph.contains(&canonical_name) {
                resolved_inputs.push(canonical_name);
            } else if graph.contains(input) {
                resolved_inputs.push(input.clone());
            } else {
                missing.push(input.clone());
            }
        }
        if !missing.is_empty() {
            return Err(RegistryError::MissingInput { metric: key.to_string(), missing }.into());
        }

        let expr: Expr = FormulaParser::parse(&defn.formula).map_err(crate::error::EngineError::Calculation)?;
        let var_names = expr.free_vars();

        Ok(Vertex::Metric {
            meta: VertexMeta { name: defn.name.clone() },
            inputs: resolved_inputs,
            body: FormulaBody::Expression { expr, var_names },
            metric_key: key.to_string(),
        })
    }

    /// Classifies a numeric metric result against its declared thresholds.
    pub fn interpret(&self, key: &str, value: f64) -> Result<Interpretation, RegistryError> {
        let defn = self.get(key)?;
        let thresholds = match &defn.interpretation {
            Some(t) => t,
            None => {
                return Ok(Interpretation {
                    rating: Rating::OutOfRange,
                    message: "no interpretation thresholds defined".to_string(),
                })
            }
        };

        if let Some(above) = thresholds.excellent_above {
            if value > above {
                return Ok(Interpretation { rating: Rating::Excellent, message: "exceeds excellent threshold".to_string() });
            }
        }
        if let Some(below) = thresholds.poor_below {
            if value < below {
                return Ok(Interpretation { rating: Rating::Poor, message: "below poor threshold".to_string() });
            }
        }
        if let Some((lo, hi)) = thresholds.good_range {
            if value >= lo && value <= hi {
                return Ok(Interpretation { rating: Rating::Good, message: "within good range".to_string() });
            }
        }
        if let Some(below) = thresholds.warning_below {
            if value < below {
                return Ok(Interpretation { rating: Rating::Warning, message: "below warning threshold".to_string() });
            }
        }
        if let Some(above) = thresholds.warning_above {
            if value > above {
                return Ok(Interpretation { rating: Rating::Warning, message: "above warning threshold".to_string() });
            }
        }
        Ok(Interpretation { rating: Rating::OutOfRange, message: "outside all declared thresholds".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Period;

    fn current_ratio_defn() -> MetricDefinition {
        MetricDefinition {
            name: "current_ratio".to_string(),
            description: None,
            inputs: vec!["current_assets".to_string(), "current_liabilities".to_string()],
            formula: "current_assets / current_liabilities".to_string(),
            category: Some("liquidity".to_string()),
            tags: vec![],
            units: None,
            interpretation: Some(InterpretationThresholds {
                good_range: Some((1.5, 3.0)),
                warning_below: Some(1.0),
                warning_above: None,
                excellent_above: None,
                poor_below: Some(0.5),
                notes: None,
            }),
        }
    }

    #[test]
    fn instantiate_resolves_inputs_and_parses_formula() {
        let mut graph = Graph::new();
        graph.add_period(Period::new("2024")).unwrap();
        graph
            .add_data_vertex("current_assets".to_string(), [(Period::new("2024"), 400.0)].into())
            .unwrap();
        graph
            .add_data_vertex("current_liabilities".to_string(), [(Period::new("2024"), 200.0)].into())
            .unwrap();

        let mut registry = MetricRegistry::new();
        registry.register(current_ratio_defn()).unwrap();
        let canonical = CanonicalNameRegistry::new();

        let vertex = registry.instantiate("current_ratio", &graph, &canonical).unwrap();
        assert_eq!(vertex.name(), "current_ratio");
        assert_eq!(vertex.dependencies(), vec!["current_assets", "current_liabilities"]);
    }

    #[test]
    fn instantiate_reports_missing_inputs() {
        let graph = Graph::new();
        let mut registry = MetricRegistry::new();
        registry.register(current_ratio_defn()).unwrap();
        let canonical = CanonicalNameRegistry::new();

        let err = registry.instantiate("current_ratio", &graph, &canonical).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Registry(RegistryError::MissingInput { .. })
        ));
    }

    #[test]
    fn interpret_classifies_value_within_good_range() {
        let mut registry = MetricRegistry::new();
        registry.register(current_ratio_defn()).unwrap();
        let interp = registry.interpret("current_ratio", 2.0).unwrap();
        assert_eq!(interp.rating, Rating::Good);
    }
}
