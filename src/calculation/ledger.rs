//! The memoization table backing [`super::engine::CalculationEngine`].
//!
//! Grounded on the teacher's `Ledger`: a flat map from key to result.
//! Generalized from a bare `NodeId` key to `(name, period, revision,
//! mode)` so a stale entry from a prior mutation is simply never looked
//! up again, rather than requiring precise reverse-dependency
//! invalidation.

use crate::error::EngineError;
use crate::period::Period;
use std::collections::HashMap;

/// Whether a memoized result reflects raw formula composition
/// ([`EvalMode::Base`]) or has adjustments folded in at every level of
/// the dependency chain ([`EvalMode::Adjusted`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalMode {
    Base,
    Adjusted,
}

type Key = (String, Period, u64, EvalMode);

/// `Ok(None)` means "computed, missing"; `Err` carries a hard
/// evaluation failure; the entry's absence means "not yet memoized".
#[derive(Debug, Clone, Default)]
pub struct Memo {
    entries: HashMap<Key, Result<Option<f64>, EngineError>>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str, period: &Period, revision: u64, mode: EvalMode) -> Option<&Result<Option<f64>, EngineError>> {
        self.entries.get(&(name.to_string(), period.clone(), revision, mode))
    }

    pub fn insert(&mut self, name: &str, period: &Period, revision: u64, mode: EvalMode, value: Result<Option<f64>, EngineError>) {
        self.entries.insert((name.to_string(), period.clone(), revision, mode), value);
    }

    /// Purges every entry for `name` (all periods, revisions, modes).
    /// Backs `clear_cache(Some(name))`.
    pub fn clear_vertex(&mut self, name: &str) {
        self.entries.retain(|(n, _, _, _), _| n != name);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Drops every entry whose revision predates `current_revision`.
    /// Not required for correctness (the key already disambiguates by
    /// revision) but keeps the table from growing unboundedly across a
    /// long-lived graph under repeated mutation.
    pub fn reclaim_stale(&mut self, current_revision: u64) {
        self.entries.retain(|(_, _, rev, _), _| *rev == current_revision);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_revision_entries_are_not_returned_as_hits() {
        let mut memo = Memo::new();
        memo.insert("Revenue", &Period::new("2024"), 1, EvalMode::Base, Ok(Some(100.0)));
        assert!(memo.get("Revenue", &Period::new("2024"), 2, EvalMode::Base).is_none());
        assert!(memo.get("Revenue", &Period::new("2024"), 1, EvalMode::Base).is_some());
    }

    #[test]
    fn clear_vertex_only_affects_that_name() {
        let mut memo = Memo::new();
        memo.insert("A", &Period::new("2024"), 1, EvalMode::Base, Ok(Some(1.0)));
        memo.insert("B", &Period::new("2024"), 1, EvalMode::Base, Ok(Some(2.0)));
        memo.clear_vertex("A");
        assert!(memo.get("A", &Period::new("2024"), 1, EvalMode::Base).is_none());
        assert!(memo.get("B", &Period::new("2024"), 1, EvalMode::Base).is_some());
    }

    #[test]
    fn reclaim_stale_drops_old_revisions_only() {
        let mut memo = Memo::new();
        memo.insert("A", &Period::new("2024"), 1, EvalMode::Base, Ok(Some(1.0)));
        memo.insert("A", &Period::new("2024"), 2, EvalMode::Base, Ok(Some(2.0)));
        memo.reclaim_stale(2);
        assert_eq!(memo.len(), 1);
        assert!(memo.get("A", &Period::new("2024"), 2, EvalMode::Base).is_some());
    }
}
