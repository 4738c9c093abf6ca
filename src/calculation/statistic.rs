//! Statistic functions used by [`crate::graph::vertex::Vertex::Statistic`]
//! vertices: built-ins (`mean`, `stdev`, year-over-year growth) plus a
//! process-wide registry of user-supplied functions keyed by name.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Year-over-year growth: the two-period special case. `values` must be
/// `[prior, current]`.
pub fn yoy_growth(values: &[f64]) -> Option<f64> {
    match values {
        [prior, current] if *prior != 0.0 => Some((current - prior) / prior),
        _ => None,
    }
}

pub type StatisticFn = dyn Fn(&[f64]) -> Option<f64> + Send + Sync;

/// Process-wide registry of custom statistic functions, keyed by name.
pub struct StatisticRegistry {
    handles: RwLock<HashMap<String, Box<StatisticFn>>>,
}

impl StatisticRegistry {
    pub fn global() -> &'static StatisticRegistry {
        static INSTANCE: OnceLock<StatisticRegistry> = OnceLock::new();
        INSTANCE.get_or_init(|| StatisticRegistry { handles: RwLock::new(HashMap::new()) })
    }

    pub fn register(&self, name: impl Into<String>, f: Box<StatisticFn>) {
        self.handles.write().unwrap().insert(name.into(), f);
    }

    pub fn compute(&self, name: &str, values: &[f64]) -> Option<Option<f64>> {
        let handles = self.handles.read().unwrap();
        handles.get(name).map(|f| f(values))
    }
}
