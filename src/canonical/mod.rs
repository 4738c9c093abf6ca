//! Maps alternate names to canonical names and classifies names by
//! category/subcategory — a read-mostly lookup table built from
//! declarative category definitions.

use crate::catalog;
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SignConvention {
    Positive,
    Negative,
}

/// One entry in the canonical-name catalog.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanonicalNameDefinition {
    pub canonical: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub sign: SignConvention,
    #[serde(default)]
    pub alternates: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardizationKind {
    /// Exact match against a canonical or alternate name.
    Exact,
    /// Recognized by suffix/shape pattern (quarterly, annual, scenario, …).
    Pattern,
    /// No match of any kind; the name is passed through unchanged.
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandardizationResult {
    pub canonical: String,
    pub confidence: f64,
    pub category: Option<String>,
    pub kind: StandardizationKind,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub counts_by_category: HashMap<String, usize>,
    pub ambiguous: Vec<String>,
}

fn pattern_table() -> &'static [(&'static str, &'static str)] {
    static TABLE: OnceLock<Vec<(&'static str, &'static str)>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            vec![
                (r"(?i)_q[1-4]$", "quarterly"),
                (r"(?i)_fy\d{4}$", "annual"),
                (r"(?i)_\d{4}$", "annual"),
                (r"(?i)_(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)$", "monthly"),
                (r"(?i)_(budget|forecast|actual)$", "scenario"),
                (r"(?i)_(na|emea|apac|latam|amer)$", "region"),
                (r"(?i)_region_[a-z0-9]+$", "region"),
                (r"(?i)_segment_[a-z0-9]+$", "segment"),
                (r"(?i)_margin$", "formula"),
                (r"(?i)_ratio$", "formula"),
                (r"(?i)_per_share$", "formula"),
                (r"(?i)_growth$", "formula"),
                (r"(?i)_yoy$", "formula"),
                (r"(?i)_qoq$", "formula"),
            ]
        })
        .as_slice()
}

fn compiled_patterns() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED
        .get_or_init(|| {
            pattern_table()
                .iter()
                .map(|(pat, label)| (Regex::new(pat).expect("static pattern is valid"), *label))
                .collect()
        })
        .as_slice()
}

/// Read-mostly registry of canonical names, built once from a catalog
/// and queried many times.
#[derive(Debug, Clone, Default)]
pub struct CanonicalNameRegistry {
    definitions: HashMap<String, CanonicalNameDefinition>,
    alternate_to_canonical: HashMap<String, String>,
}

impl CanonicalNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: CanonicalNameDefinition) {
        for alt in &def.alternates {
            self.alternate_to_canonical.insert(alt.clone(), def.canonical.clone());
        }
        self.definitions.insert(def.canonical.clone(), def);
    }

    /// Loads definitions from a declarative catalog document (§6.3).
    pub fn load_catalog(src: &str) -> Result<Self, crate::error::SerializationError> {
        let defs: Vec<CanonicalNameDefinition> = catalog::load_records(src)?;
        let mut registry = Self::new();
        for def in defs {
            registry.register(def);
        }
        Ok(registry)
    }

    pub fn get(&self, canonical: &str) -> Option<&CanonicalNameDefinition> {
        self.definitions.get(canonical)
    }

    /// Resolves `name` to its canonical form, confidence, and category.
    pub fn standardize(&self, name: &str) -> StandardizationResult {
        if let Some(def) = self.definitions.get(name) {
            return StandardizationResult {
                canonical: def.canonical.clone(),
                confidence: 1.0,
                category: Some(def.category.clone()),
                kind: StandardizationKind::Exact,
            };
        }
        if let Some(canonical) = self.alternate_to_canonical.get(name) {
            let category = self.definitions.get(canonical).map(|d| d.category.clone());
            return StandardizationResult {
                canonical: canonical.clone(),
                confidence: 1.0,
                category,
                kind: StandardizationKind::Exact,
            };
        }
        for (pattern, label) in compiled_patterns() {
            if pattern.is_match(name) {
                return StandardizationResult {
                    canonical: name.to_string(),
                    confidence: 0.7,
                    category: Some(label.to_string()),
                    kind: StandardizationKind::Pattern,
                };
            }
        }
        StandardizationResult {
            canonical: name.to_string(),
            confidence: 0.0,
            category: None,
            kind: StandardizationKind::Custom,
        }
    }

    /// Standardizes a batch of names in parallel, returning counts by
    /// category and flagging pattern-classified (ambiguous) names.
    pub fn validate_batch(&self, names: &[String]) -> ValidationReport {
        let results: Vec<StandardizationResult> =
            names.par_iter().map(|n| self.standardize(n)).collect();

        let mut report = ValidationReport::default();
        for (name, result) in names.iter().zip(results.iter()) {
            if let Some(cat) = &result.category {
                *report.counts_by_category.entry(cat.clone()).or_insert(0) += 1;
            }
            if result.kind == StandardizationKind::Pattern {
                report.ambiguous.push(name.clone());
            }
        }
        report
    }
}
