//! Scenario overlays: immutable per-`(vertex, period)` adjustments that
//! compose deterministically onto a base calculated value.

use crate::error::AdjustmentError;
use crate::period::Period;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AdjustmentKind {
    Additive,
    Multiplicative,
    Replacement,
}

/// A single scenario overlay record. Immutable once stored (A2).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Adjustment {
    pub id: String,
    pub vertex_name: String,
    pub period: Period,
    pub value: f64,
    pub kind: AdjustmentKind,
    /// Composition order within a `(vertex, period)` bucket: ascending
    /// priority, then ascending insertion order (§9 Open Question,
    /// resolved normatively: always sort, never trust caller order).
    pub priority: i64,
    pub tags: Vec<String>,
    pub scenario: Option<String>,
    pub reason: Option<String>,
}

/// Declarative filter for [`AdjustmentManager::filter`]. All set fields
/// are ANDed together; an unset field imposes no constraint.
#[derive(Debug, Clone, Default)]
pub struct AdjustmentFilter<'a> {
    pub include_tags: Option<&'a [String]>,
    pub exclude_tags: Option<&'a [String]>,
    pub scenarios: Option<&'a [String]>,
    pub predicate: Option<&'a dyn Fn(&Adjustment) -> bool>,
}

impl<'a> AdjustmentFilter<'a> {
    fn matches(&self, adj: &Adjustment) -> bool {
        if let Some(include) = self.include_tags {
            if !include.iter().any(|t| adj.tags.contains(t)) {
                return false;
            }
        }
        if let Some(exclude) = self.exclude_tags {
            if exclude.iter().any(|t| adj.tags.contains(t)) {
                return false;
            }
        }
        if let Some(scenarios) = self.scenarios {
            match &adj.scenario {
                Some(s) if scenarios.contains(s) => {}
                _ => return false,
            }
        }
        if let Some(pred) = self.predicate {
            if !pred(adj) {
                return false;
            }
        }
        true
    }
}

/// Stores adjustments keyed by `(vertex_name, period)`, insertion-ordered
/// within each bucket. Never mutates a stored record (A2); `remove`
/// deletes the record outright.
#[derive(Debug, Clone, Default)]
pub struct AdjustmentManager {
    by_key: HashMap<(String, Period), Vec<Adjustment>>,
    next_seq: u64,
}

impl AdjustmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an adjustment. `vertex_name` need not currently exist in
    /// the graph (A1, late binding); applying it to a nonexistent
    /// vertex is simply a no-op at apply time. Rejects a duplicate `id`
    /// rather than silently shadowing the existing record.
    pub fn add(&mut self, adj: Adjustment) -> Result<(), AdjustmentError> {
        if !matches!(adj.kind, AdjustmentKind::Replacement) && adj.value.is_nan() {
            return Err(AdjustmentError::InvalidAdjustment {
                vertex: adj.vertex_name.clone(),
                period: adj.period.clone(),
                reason: "value must not be NaN".to_string(),
            });
        }
        if self.contains_id(&adj.id) {
            return Err(AdjustmentError::DuplicateAdjustment(adj.id));
        }
        let key = (adj.vertex_name.clone(), adj.period.clone());
        self.by_key.entry(key).or_default().push(adj);
        self.next_seq += 1;
        Ok(())
    }

    /// Whether an adjustment with this `id` is currently stored, under
    /// any `(vertex, period)` key.
    pub fn contains_id(&self, id: &str) -> bool {
        self.by_key.values().flatten().any(|a| a.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Result<(), AdjustmentError> {
        for bucket in self.by_key.values_mut() {
            if let Some(pos) = bucket.iter().position(|a| a.id == id) {
                bucket.remove(pos);
                return Ok(());
            }
        }
        Err(AdjustmentError::UnknownAdjustment(id.to_string()))
    }

    pub fn list(&self, filter: Option<&AdjustmentFilter>) -> Vec<&Adjustment> {
        let mut all: Vec<&Adjustment> = self.by_key.values().flatten().collect();
        if let Some(filter) = filter {
            all.retain(|a| filter.matches(a));
        }
        all
    }

    /// Adjustments stored for one `(vertex, period)`, in insertion order
    /// (the order composed onto, per §9's normative priority-then-
    /// insertion sort, lives in [`Self::apply`]).
    fn for_key(&self, vertex_name: &str, period: &Period) -> &[Adjustment] {
        self.by_key
            .get(&(vertex_name.to_string(), period.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Composes all adjustments for `(vertex_name, period)` onto `base`,
    /// sorted by `(priority asc, insertion_order asc)` — always, never
    /// the raw storage order (§9 Open Question).
    pub fn apply(&self, vertex_name: &str, period: &Period, base: f64) -> (f64, Vec<&Adjustment>) {
        let mut applicable: Vec<&Adjustment> = self.for_key(vertex_name, period).iter().collect();
        let insertion_index: HashMap<*const Adjustment, usize> = applicable
            .iter()
            .enumerate()
            .map(|(i, a)| (*a as *const Adjustment, i))
            .collect();
        applicable.sort_by_key(|a| (a.priority, insertion_index[&(*a as *const Adjustment)]));

        let mut value = base;
        for adj in &applicable {
            value = match adj.kind {
                AdjustmentKind::Additive => value + adj.value,
                AdjustmentKind::Multiplicative => value * adj.value,
                AdjustmentKind::Replacement => adj.value,
            };
        }
        (value, applicable)
    }

    pub fn filter<'a>(&'a self, filter: AdjustmentFilter<'a>) -> Vec<&'a Adjustment> {
        self.list(Some(&filter))
    }
}
