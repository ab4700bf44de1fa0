use analysis_core::stats::{clamp_unit, max_drawdown, mean, simple_returns, std_dev};
use analysis_core::{AccountState, Candle, EquityPoint, RiskMetrics, Timeframe};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::var::historical_var;

/// Sub-score used when an input is missing.
const NEUTRAL: f64 = 0.5;
/// Annualized volatility that maps to a full volatility score.
const VOLATILITY_CAP: f64 = 0.50;
/// Drawdown that maps to a full drawdown score.
const DRAWDOWN_CAP: f64 = 0.20;
/// One-day 95% VaR that maps to a full VaR score.
const DAILY_VAR_CAP: f64 = 0.05;

/// Blend weights for the overall risk score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub volatility: f64,
    pub drawdown: f64,
    pub var: f64,
    pub liquidity: f64,
    pub concentration: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            volatility: 0.35,
            drawdown: 0.25,
            var: 0.15,
            liquidity: 0.15,
            concentration: 0.10,
        }
    }
}

impl RiskWeights {
    fn total(&self) -> f64 {
        self.volatility + self.drawdown + self.var + self.liquidity + self.concentration
    }
}

/// Everything the scorer looks at for one evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskInputs<'a> {
    /// Price history, oldest first
    pub candles: &'a [Candle],
    /// Account equity curve, oldest first; price is used when empty
    pub equity_history: &'a [EquityPoint],
    pub account: Option<&'a AccountState>,
    /// Bid-ask spread as a fraction of mid price
    pub spread_pct: Option<f64>,
}

/// Normalized per-dimension scores behind `overall_risk_score`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskSubScores {
    pub volatility: f64,
    pub drawdown: f64,
    pub var: f64,
    pub liquidity: f64,
    pub concentration: f64,
}

#[derive(Debug, Clone)]
pub struct RiskScorer {
    window: usize,
    periods_per_year: f64,
    risk_free_rate: f64,
    weights: RiskWeights,
}

impl RiskScorer {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            window: 100,
            periods_per_year: timeframe.periods_per_year(),
            risk_free_rate: 0.02,
            weights: RiskWeights::default(),
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(2);
        self
    }

    pub fn with_weights(mut self, weights: RiskWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn periods_per_year(&self) -> f64 {
        self.periods_per_year
    }

    pub fn weights(&self) -> &RiskWeights {
        &self.weights
    }

    pub fn score(&self, inputs: &RiskInputs<'_>) -> RiskMetrics {
        let candles = tail(inputs.candles, self.window);
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let returns = simple_returns(&closes);

        let volatility = if returns.len() >= 2 {
            Some(std_dev(&returns) * self.periods_per_year.sqrt())
        } else {
            None
        };
        let sharpe_ratio = self.sharpe(&returns);

        let equity: Vec<f64> = tail(inputs.equity_history, self.window)
            .iter()
            .map(|p| p.equity)
            .collect();
        let drawdown = if equity.len() >= 2 {
            Some(max_drawdown(&equity))
        } else if closes.len() >= 2 {
            Some(max_drawdown(&closes))
        } else {
            None
        };

        let var95 = historical_var(&returns, 1.0, 0.95);
        let var99 = historical_var(&returns, 1.0, 0.99);

        let liquidity_risk = liquidity_score(candles, inputs.spread_pct);
        let (concentration_risk, diversification_ratio) = match inputs.account {
            Some(account) => concentration(account),
            None => (NEUTRAL, NEUTRAL),
        };

        let sub = RiskSubScores {
            volatility: volatility.map(|v| clamp_unit(v / VOLATILITY_CAP)).unwrap_or(NEUTRAL),
            drawdown: drawdown.map(|d| clamp_unit(d / DRAWDOWN_CAP)).unwrap_or(NEUTRAL),
            var: var95
                .map(|v| clamp_unit(v * self.daily_scale() / DAILY_VAR_CAP))
                .unwrap_or(NEUTRAL),
            liquidity: liquidity_risk,
            concentration: concentration_risk,
        };
        let overall_risk_score = self.blend(&sub);

        debug!(
            overall = overall_risk_score,
            volatility = sub.volatility,
            drawdown = sub.drawdown,
            var = sub.var,
            liquidity = sub.liquidity,
            concentration = sub.concentration,
            "Scored risk"
        );

        RiskMetrics {
            volatility: volatility.unwrap_or(0.0),
            sharpe_ratio,
            max_drawdown: drawdown.unwrap_or(0.0),
            var95: var95.unwrap_or(0.0),
            var99: var99.unwrap_or(0.0),
            liquidity_risk,
            concentration_risk,
            diversification_ratio,
            overall_risk_score,
        }
    }

    /// Weighted blend of sub-scores, clamped to [0, 1].
    pub fn blend(&self, sub: &RiskSubScores) -> f64 {
        let w = &self.weights;
        let total = w.total();
        if total <= 0.0 {
            return NEUTRAL;
        }
        let raw = sub.volatility * w.volatility
            + sub.drawdown * w.drawdown
            + sub.var * w.var
            + sub.liquidity * w.liquidity
            + sub.concentration * w.concentration;
        clamp_unit(raw / total)
    }

    fn sharpe(&self, returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let std = std_dev(returns);
        if std == 0.0 {
            return 0.0;
        }
        let excess = mean(returns) - self.risk_free_rate / self.periods_per_year;
        excess / std * self.periods_per_year.sqrt()
    }

    /// Converts a one-bar figure to one day via square-root-of-time.
    fn daily_scale(&self) -> f64 {
        (self.periods_per_year / 365.0).sqrt()
    }
}

fn tail<T>(items: &[T], window: usize) -> &[T] {
    &items[items.len().saturating_sub(window)..]
}

/// Spread and thin volume both raise liquidity risk; either one alone is used when the other is missing.
fn liquidity_score(candles: &[Candle], spread_pct: Option<f64>) -> f64 {
    let avg_volume = if candles.is_empty() {
        None
    } else {
        let vol = candles.iter().map(|c| c.volume * c.close).sum::<f64>() / candles.len() as f64;
        Some(vol)
    };

    // < 100k notional per bar = 1, > 10M = 0
    let volume_score = avg_volume.map(|v| clamp_unit((7.0 - v.max(1.0).log10()) / 2.0));
    // > 1% = 1, < 0.01% = 0
    let spread_score = spread_pct.map(|s| clamp_unit((s - 0.0001) / 0.01));

    match (volume_score, spread_score) {
        (Some(v), Some(s)) => v * 0.5 + s * 0.5,
        (Some(v), None) => v,
        (None, Some(s)) => s,
        (None, None) => NEUTRAL,
    }
}

/// (largest single-asset share of equity, 1 - that share).
/// A book with no positions has no history to judge and scores mid-range.
fn concentration(account: &AccountState) -> (f64, f64) {
    let equity = account.equity();
    if account.open_positions.is_empty() || equity <= 0.0 {
        return (NEUTRAL, NEUTRAL);
    }
    let largest = account
        .open_positions
        .iter()
        .map(|p| p.market_value())
        .fold(0.0_f64, f64::max);
    let share = clamp_unit(largest / equity);
    (share, 1.0 - share)
}
