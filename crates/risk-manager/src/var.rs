//! Historical-simulation Value at Risk and Expected Shortfall.
//!
//! Every horizon in the reporting panel goes through the same two functions,
//! so one-period and multi-day figures always share numeric semantics.

use analysis_core::ReturnPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Fewer returns than this and the tail is too thin to read.
pub const MIN_VAR_SAMPLES: usize = 10;

fn sorted_returns(returns: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Number of observations in the loss tail at `confidence` (at least one).
fn tail_len(n: usize, confidence: f64) -> usize {
    (((1.0 - confidence) * n as f64).floor() as usize).clamp(1, n)
}

/// Historical VaR at `confidence` (e.g. 0.95), scaled by `horizon_scale`.
///
/// Returned as a positive loss fraction; a return distribution without losses
/// in its tail yields 0. `None` when fewer than [`MIN_VAR_SAMPLES`] returns.
pub fn historical_var(returns: &[f64], horizon_scale: f64, confidence: f64) -> Option<f64> {
    let sorted = sorted_returns(returns);
    if sorted.len() < MIN_VAR_SAMPLES || !(0.0..1.0).contains(&confidence) {
        return None;
    }
    let idx = tail_len(sorted.len(), confidence) - 1;
    Some((-sorted[idx]).max(0.0) * horizon_scale)
}

/// Historical Expected Shortfall (CVaR): mean of the tail beyond VaR, scaled by `horizon_scale`.
pub fn historical_expected_shortfall(
    returns: &[f64],
    horizon_scale: f64,
    confidence: f64,
) -> Option<f64> {
    let sorted = sorted_returns(returns);
    if sorted.len() < MIN_VAR_SAMPLES || !(0.0..1.0).contains(&confidence) {
        return None;
    }
    let tail = &sorted[..tail_len(sorted.len(), confidence)];
    let mean = tail.iter().sum::<f64>() / tail.len() as f64;
    Some((-mean).max(0.0) * horizon_scale)
}

/// A reporting horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskHorizon {
    pub label: String,
    pub days: u32,
}

impl RiskHorizon {
    pub fn new(label: &str, days: u32) -> Self {
        Self {
            label: label.to_string(),
            days,
        }
    }

    /// Square-root-of-time scaling from one-bar returns to this horizon
    pub fn scale(&self, periods_per_day: f64) -> f64 {
        (periods_per_day.max(0.0) * self.days as f64).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarPoint {
    pub horizon: String,
    pub var: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsPoint {
    pub horizon: String,
    pub cvar: f64,
}

/// VaR / ES panel across horizons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonRiskReport {
    pub confidence: f64,
    pub var_series: Vec<VarPoint>,
    pub es_series: Vec<EsPoint>,
}

/// One bot's share of the portfolio
#[derive(Debug, Clone, Copy)]
pub struct PortfolioSleeve<'a> {
    /// Capital behind the sleeve; only the ratio between sleeves matters
    pub weight: f64,
    pub returns: &'a [ReturnPoint],
}

/// Capital-weighted portfolio returns over the bars every sleeve has observed.
///
/// Bars missing from any sleeve are dropped. Sleeves are equal-weighted when the
/// weights do not sum to something positive.
pub fn combine_returns(sleeves: &[PortfolioSleeve<'_>]) -> Vec<f64> {
    if sleeves.is_empty() {
        return Vec::new();
    }
    let valid_weight = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
    let total: f64 = sleeves.iter().map(|s| valid_weight(s.weight)).sum();
    let weight_of = |s: &PortfolioSleeve<'_>| {
        if total > 0.0 {
            valid_weight(s.weight) / total
        } else {
            1.0 / sleeves.len() as f64
        }
    };

    // timestamp -> (weighted return, sleeves seen)
    let mut bars: BTreeMap<DateTime<Utc>, (f64, usize)> = BTreeMap::new();
    for sleeve in sleeves {
        let w = weight_of(sleeve);
        for point in sleeve.returns.iter().filter(|p| p.value.is_finite()) {
            let bar = bars.entry(point.timestamp).or_insert((0.0, 0));
            bar.0 += w * point.value;
            bar.1 += 1;
        }
    }

    bars.into_values()
        .filter(|(_, seen)| *seen == sleeves.len())
        .map(|(value, _)| value)
        .collect()
}

/// Builds the multi-horizon VaR/ES panel from per-bar portfolio returns.
#[derive(Debug, Clone)]
pub struct MultiHorizonRiskAggregator {
    horizons: Vec<RiskHorizon>,
    confidence: f64,
}

impl MultiHorizonRiskAggregator {
    pub fn new(horizons: Vec<RiskHorizon>, confidence: f64) -> Self {
        Self {
            horizons,
            confidence,
        }
    }

    pub fn horizons(&self) -> &[RiskHorizon] {
        &self.horizons
    }

    /// `returns` are one-bar returns and `periods_per_day` the bars in a day
    /// (24 for hourly bars). Values are 0 when there is not enough history.
    pub fn aggregate(&self, returns: &[f64], periods_per_day: f64) -> HorizonRiskReport {
        let mut var_series = Vec::with_capacity(self.horizons.len());
        let mut es_series = Vec::with_capacity(self.horizons.len());

        for horizon in &self.horizons {
            let scale = horizon.scale(periods_per_day);
            let var = historical_var(returns, scale, self.confidence).unwrap_or(0.0);
            let cvar =
                historical_expected_shortfall(returns, scale, self.confidence).unwrap_or(0.0);
            var_series.push(VarPoint {
                horizon: horizon.label.clone(),
                var,
            });
            es_series.push(EsPoint {
                horizon: horizon.label.clone(),
                cvar,
            });
        }

        debug!(
            samples = returns.len(),
            periods_per_day,
            horizons = self.horizons.len(),
            "Aggregated multi-horizon risk"
        );

        HorizonRiskReport {
            confidence: self.confidence,
            var_series,
            es_series,
        }
    }
}

impl Default for MultiHorizonRiskAggregator {
    /// 1 day, 1 week and 1 month at 95%
    fn default() -> Self {
        Self::new(
            vec![
                RiskHorizon::new("1d", 1),
                RiskHorizon::new("1w", 7),
                RiskHorizon::new("1m", 30),
            ],
            0.95,
        )
    }
}
