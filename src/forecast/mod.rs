//! Lazy projection strategies for [`crate::graph::vertex::Vertex::Forecast`]
//! vertices: synthesize a value for a period beyond the base vertex's
//! historical coverage.

use crate::error::ForecastError;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Aggregation {
    Mean,
    Median,
}

impl Aggregation {
    pub fn aggregate(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Aggregation::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Median => {
                let mut sorted: Vec<f64> = values.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let mid = sorted.len() / 2;
                Some(if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Distribution_ {
    Normal { mean: f64, std_dev: f64 },
    Uniform { low: f64, high: f64 },
}

/// Declarative parameters for a forecast strategy, resolved by
/// [`ForecastStrategySpec::key`] at serialization boundaries.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ForecastStrategySpec {
    FixedGrowth { rate: f64 },
    Curve { rates: Vec<f64> },
    Statistical { distribution: Distribution_, seed: u64 },
    HistoricalAverageGrowth { aggregation: Aggregation },
    AverageValue { aggregation: Aggregation },
    /// Delegates to a registered [`CustomForecastFn`]. Non-serializable
    /// handles are rejected at registration-lookup time, not silently
    /// dropped (Design Notes §9).
    Custom { handle: String },
}

impl ForecastStrategySpec {
    pub fn key(&self) -> &'static str {
        match self {
            ForecastStrategySpec::FixedGrowth { .. } => "fixed-growth",
            ForecastStrategySpec::Curve { .. } => "curve",
            ForecastStrategySpec::Statistical { .. } => "statistical",
            ForecastStrategySpec::HistoricalAverageGrowth { .. } => "historical-average-growth",
            ForecastStrategySpec::AverageValue { .. } => "average-value",
            ForecastStrategySpec::Custom { .. } => "custom",
        }
    }

    /// Projects the value `k` periods after `base_period` (`k >= 1`).
    /// `history` holds the base vertex's known values in period order,
    /// ending at (and including) the base period's value.
    pub fn project(&self, history: &[f64], k: usize) -> Result<f64, ForecastError> {
        if k == 0 {
            return Err(ForecastError::InvalidHorizon("k must be >= 1".to_string()));
        }
        let base_value = *history.last().ok_or_else(|| {
            ForecastError::InvalidHorizon("base vertex has no historical value".to_string())
        })?;

        match self {
            ForecastStrategySpec::FixedGrowth { rate } => Ok(base_value * (1.0 + rate).powi(k as i32)),
            ForecastStrategySpec::Curve { rates } => {
                if rates.len() < k {
                    return Err(ForecastError::InvalidHorizon(format!(
                        "curve has {} rate(s), need at least {}",
                        rates.len(),
                        k
                    )));
                }
                let mut value = base_value;
                for rate in &rates[..k] {
                    value *= 1.0 + rate;
                }
                Ok(value)
            }
            ForecastStrategySpec::Statistical { distribution, seed } => {
                let rate = sample_growth_rate(distribution, *seed, k);
                Ok(base_value * (1.0 + rate))
            }
            ForecastStrategySpec::HistoricalAverageGrowth { aggregation } => {
                let growth_rates = period_over_period_growth(history);
                let avg = aggregation
                    .aggregate(&growth_rates)
                    .ok_or_else(|| ForecastError::InvalidHorizon("insufficient history for growth average".to_string()))?;
                Ok(base_value * (1.0 + avg).powi(k as i32))
            }
            ForecastStrategySpec::AverageValue { aggregation } => aggregation
                .aggregate(history)
                .ok_or_else(|| ForecastError::InvalidHorizon("insufficient history to average".to_string())),
            ForecastStrategySpec::Custom { handle } => CustomForecastRegistry::global().call(handle, history, k),
        }
    }
}

fn period_over_period_growth(history: &[f64]) -> Vec<f64> {
    history
        .windows(2)
        .filter_map(|w| if w[0] != 0.0 { Some((w[1] - w[0]) / w[0]) } else { None })
        .collect()
}

/// Samples a growth rate for horizon index `k`, seeded deterministically
/// from `seed` and `k` so repeated calls at the same horizon are
/// reproducible (spec: "seedable for determinism").
fn sample_growth_rate(dist: &Distribution_, seed: u64, k: usize) -> f64 {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed ^ (k as u64));
    match dist {
        Distribution_::Normal { mean, std_dev } => {
            let normal = Normal::new(*mean, *std_dev).expect("valid normal parameters");
            normal.sample(&mut rng)
        }
        Distribution_::Uniform { low, high } => {
            let uniform = Uniform::new(*low, *high);
            uniform.sample(&mut rng)
        }
    }
}

pub type CustomForecastFn = dyn Fn(&[f64], usize) -> f64 + Send + Sync;

/// Process-wide registry of custom forecast callables, keyed by handle
/// name. Registration is intended to happen once at process start.
pub struct CustomForecastRegistry {
    handles: RwLock<HashMap<String, Box<CustomForecastFn>>>,
}

impl CustomForecastRegistry {
    pub fn global() -> &'static CustomForecastRegistry {
        static INSTANCE: OnceLock<CustomForecastRegistry> = OnceLock::new();
        INSTANCE.get_or_init(|| CustomForecastRegistry { handles: RwLock::new(HashMap::new()) })
    }

    pub fn register(&self, name: impl Into<String>, f: Box<CustomForecastFn>) {
        self.handles.write().unwrap().insert(name.into(), f);
    }

    /// Looks up `name` and invokes it while holding the read lock,
    /// since the stored callable isn't `Clone`.
    fn call(&self, name: &str, history: &[f64], k: usize) -> Result<f64, ForecastError> {
        let handles = self.handles.read().unwrap();
        let f = handles
            .get(name)
            .ok_or_else(|| ForecastError::UnknownForecastStrategy(name.to_string()))?;
        Ok(f(history, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_growth_compounds_per_horizon_step() {
        let spec = ForecastStrategySpec::FixedGrowth { rate: 0.05 };
        let history = vec![1000.0, 1100.0];
        assert!((spec.project(&history, 1).unwrap() - 1155.0).abs() < 1e-9);
        assert!((spec.project(&history, 2).unwrap() - 1212.75).abs() < 1e-9);
    }

    #[test]
    fn curve_multiplies_successive_rates() {
        let spec = ForecastStrategySpec::Curve { rates: vec![0.1, 0.2] };
        let history = vec![100.0];
        assert!((spec.project(&history, 1).unwrap() - 110.0).abs() < 1e-9);
        assert!((spec.project(&history, 2).unwrap() - 132.0).abs() < 1e-9);
    }

    #[test]
    fn average_value_projects_constant_aggregate() {
        let spec = ForecastStrategySpec::AverageValue { aggregation: Aggregation::Mean };
        let history = vec![10.0, 20.0, 30.0];
        assert_eq!(spec.project(&history, 1).unwrap(), 20.0);
        assert_eq!(spec.project(&history, 5).unwrap(), 20.0);
    }

    #[test]
    fn historical_average_growth_projects_from_mean_growth() {
        let spec = ForecastStrategySpec::HistoricalAverageGrowth { aggregation: Aggregation::Mean };
        let history = vec![100.0, 110.0, 121.0]; // 10% growth twice
        let projected = spec.project(&history, 1).unwrap();
        assert!((projected - 133.1).abs() < 1e-6);
    }

    #[test]
    fn statistical_strategy_is_deterministic_for_same_seed_and_horizon() {
        let spec = ForecastStrategySpec::Statistical {
            distribution: Distribution_::Normal { mean: 0.03, std_dev: 0.01 },
            seed: 42,
        };
        let history = vec![100.0];
        let a = spec.project(&history, 3).unwrap();
        let b = spec.project(&history, 3).unwrap();
        assert_eq!(a, b);
    }
}
