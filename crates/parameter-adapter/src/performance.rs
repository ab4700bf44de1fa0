//! Realized trade history per regime, used to lean parameters toward what has
//! been working.

use analysis_core::{stats, MarketRegime, TradeOutcome};
use serde::{Deserialize, Serialize};

/// Win rate at which history neither loosens nor tightens parameters.
pub const NEUTRAL_WIN_RATE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub trades: usize,
    pub win_rate: f64,
    pub mean_return: f64,
    /// Sample standard deviation of per-trade returns
    pub return_std: f64,
}

impl PerformanceStats {
    /// Stats over the outcomes that closed in `regime`. `None` when there are none.
    pub fn for_regime(outcomes: &[TradeOutcome], regime: MarketRegime) -> Option<Self> {
        let returns: Vec<f64> = outcomes
            .iter()
            .filter(|o| o.regime == regime && o.return_pct.is_finite())
            .map(|o| o.return_pct)
            .collect();
        if returns.is_empty() {
            return None;
        }
        let wins = outcomes
            .iter()
            .filter(|o| o.regime == regime && o.return_pct.is_finite() && o.is_win())
            .count();

        Some(Self {
            trades: returns.len(),
            win_rate: wins as f64 / returns.len() as f64,
            mean_return: stats::mean(&returns),
            return_std: stats::std_dev(&returns),
        })
    }

    /// Signed distance of the win rate from neutral
    pub fn edge(&self) -> f64 {
        self.win_rate - NEUTRAL_WIN_RATE
    }

    /// Additive threshold change: winning lowers the bar, losing raises it.
    pub fn threshold_delta(&self) -> f64 {
        -self.edge() * 0.2
    }

    /// Multiplicative size change, damped when returns are dispersed.
    pub fn size_factor(&self) -> f64 {
        let dispersion = (1.0 - 2.0 * self.return_std).clamp(0.5, 1.0);
        (1.0 + self.edge() * 0.5) * dispersion
    }
}
