//! Reporting-period identifiers.
//!
//! A [`Period`] is an opaque, totally-ordered string identifier
//! (`"2024"`, `"2024-Q3"`, `"2024-03"`). The engine never interprets
//! calendar semantics — only equality and order, both delegated to the
//! canonical string form. Periods that look numeric-annual
//! (`"2024"`) or quarterly (`"2024-Q3"`) sort the way a human expects
//! because those forms happen to be lexically ordered already; the
//! engine does not special-case them.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Period(String);

impl Period {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Period {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Period {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A sorted, de-duplicated sequence of periods owned by a [`crate::graph::Graph`].
#[derive(Debug, Clone, Default)]
pub struct PeriodSequence {
    periods: Vec<Period>,
}

impl PeriodSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `period` in sorted position if not already present.
    /// Returns `true` if the period was newly added.
    pub fn insert(&mut self, period: Period) -> bool {
        match self.periods.binary_search(&period) {
            Ok(_) => false,
            Err(idx) => {
                self.periods.insert(idx, period);
                true
            }
        }
    }

    pub fn contains(&self, period: &Period) -> bool {
        self.periods.binary_search(period).is_ok()
    }

    pub fn as_slice(&self) -> &[Period] {
        &self.periods
    }

    pub fn iter(&self) -> impl Iterator<Item = &Period> {
        self.periods.iter()
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Periods strictly between `base` (exclusive) and the end, in order —
    /// used by the forecast kernel to enumerate horizon indices relative to
    /// a base period.
    pub fn position(&self, period: &Period) -> Option<usize> {
        self.periods.binary_search(period).ok()
    }
}
