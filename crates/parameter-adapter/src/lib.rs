pub mod performance;

use analysis_core::{
    AdaptiveParameters, EngineError, MarketRegime, RiskMetrics, TradeOutcome,
    MAX_CONFIDENCE_THRESHOLD, MIN_CONFIDENCE_THRESHOLD,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use performance::PerformanceStats;

pub const MIN_POSITION_MULTIPLIER: f64 = 0.1;
pub const MAX_POSITION_MULTIPLIER: f64 = 2.0;

/// Overall risk below which a bull market may expand size.
const LOW_RISK: f64 = 0.4;
/// Overall risk above which size is cut in any regime.
const HIGH_RISK: f64 = 0.7;
/// Closed trades in a regime needed before history moves parameters.
pub const DEFAULT_MIN_TRADES: usize = 5;

/// Starting parameters tuned per regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimePreset {
    pub position_multiplier: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub confidence_threshold: f64,
}

impl RegimePreset {
    pub fn for_regime(regime: MarketRegime) -> Self {
        match regime {
            MarketRegime::Bull => Self {
                position_multiplier: 1.2,
                stop_loss_pct: 0.02,
                take_profit_pct: 0.06,
                confidence_threshold: 0.6,
            },
            MarketRegime::Bear => Self {
                position_multiplier: 0.8,
                stop_loss_pct: 0.015,
                take_profit_pct: 0.04,
                confidence_threshold: 0.75,
            },
            MarketRegime::Volatile => Self {
                position_multiplier: 0.5,
                stop_loss_pct: 0.03,
                take_profit_pct: 0.08,
                confidence_threshold: 0.8,
            },
            MarketRegime::Sideways => Self {
                position_multiplier: 1.0,
                stop_loss_pct: 0.02,
                take_profit_pct: 0.05,
                confidence_threshold: 0.7,
            },
        }
    }

    /// Base parameters with this preset's fields; risk per trade and trailing stop are kept.
    pub fn apply_to(&self, base: &AdaptiveParameters) -> AdaptiveParameters {
        AdaptiveParameters {
            confidence_threshold: self.confidence_threshold,
            position_multiplier: self.position_multiplier,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            adaptive_reasoning: Vec::new(),
            ..base.clone()
        }
    }
}

/// Where adaptation starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseSource {
    /// The operator-configured base parameters
    #[default]
    Configured,
    /// The regime's preset table, layered over the configured base
    RegimePreset,
}

/// Maps (regime, risk, trade history) to a fresh parameter set. Pure: no state
/// survives a call; the caller owns the history.
#[derive(Debug, Clone)]
pub struct ParameterAdapter {
    base_source: BaseSource,
    min_trades: usize,
}

impl Default for ParameterAdapter {
    fn default() -> Self {
        Self::new(BaseSource::default())
    }
}

impl ParameterAdapter {
    pub fn new(base_source: BaseSource) -> Self {
        Self {
            base_source,
            min_trades: DEFAULT_MIN_TRADES,
        }
    }

    /// Require `min_trades` closed trades in a regime before history applies. Zero disables it.
    pub fn with_min_trades(mut self, min_trades: usize) -> Self {
        self.min_trades = min_trades;
        self
    }

    pub fn base_source(&self) -> BaseSource {
        self.base_source
    }

    pub fn min_trades(&self) -> usize {
        self.min_trades
    }

    pub fn adapt(
        &self,
        regime: MarketRegime,
        risk: &RiskMetrics,
        base: &AdaptiveParameters,
    ) -> Result<AdaptiveParameters, EngineError> {
        self.adapt_with_history(regime, risk, base, &[])
    }

    /// Like [`adapt`](Self::adapt), then leaned by the realized outcomes of
    /// trades that closed in the same regime.
    pub fn adapt_with_history(
        &self,
        regime: MarketRegime,
        risk: &RiskMetrics,
        base: &AdaptiveParameters,
        outcomes: &[TradeOutcome],
    ) -> Result<AdaptiveParameters, EngineError> {
        base.validate()?;

        let mut params = match self.base_source {
            BaseSource::Configured => AdaptiveParameters {
                adaptive_reasoning: Vec::new(),
                ..base.clone()
            },
            BaseSource::RegimePreset => {
                let mut p = RegimePreset::for_regime(regime).apply_to(base);
                p.adaptive_reasoning
                    .push(format!("Starting from {} regime preset", regime));
                p
            }
        };
        let risk_score = risk.overall_risk_score;

        match regime {
            MarketRegime::Bull if risk_score < LOW_RISK => {
                let boost = 0.2 * (1.0 - risk_score / LOW_RISK);
                params.position_multiplier *= 1.0 + boost;
                params.trailing_stop_enabled = true;
                params.confidence_threshold -= 0.05;
                params.adaptive_reasoning.push(format!(
                    "Bull market with low risk ({:.2}): size +{:.0}%, trailing stop on, threshold -0.05",
                    risk_score,
                    boost * 100.0
                ));
            }
            MarketRegime::Bull => {}
            MarketRegime::Bear => {
                params.confidence_threshold += 0.10;
                params.position_multiplier *= 0.7;
                params.stop_loss_pct *= 0.75;
                params.adaptive_reasoning.push(
                    "Bear market: threshold +0.10, size x0.7, stop tightened x0.75".to_string(),
                );
            }
            MarketRegime::Volatile => {
                params.confidence_threshold += 0.15;
                params.position_multiplier *= 0.5;
                params.stop_loss_pct *= 1.5;
                params.take_profit_pct *= 1.5;
                params.adaptive_reasoning.push(
                    "Volatile market: threshold +0.15, size x0.5, stop and target widened x1.5"
                        .to_string(),
                );
            }
            MarketRegime::Sideways => {
                let cap = 1.5 * params.stop_loss_pct;
                if params.take_profit_pct > cap {
                    params.take_profit_pct = cap;
                }
                params.adaptive_reasoning.push(format!(
                    "Sideways market: take-profit capped at 1.5x stop ({:.2}%)",
                    params.take_profit_pct * 100.0
                ));
            }
        }

        let history = PerformanceStats::for_regime(outcomes, regime)
            .filter(|stats| self.min_trades > 0 && stats.trades >= self.min_trades);
        if let Some(stats) = history {
            let delta = stats.threshold_delta();
            let factor = stats.size_factor();
            params.confidence_threshold += delta;
            params.position_multiplier *= factor;
            params.adaptive_reasoning.push(format!(
                "{} performance over {} trades: win rate {:.0}%, mean return {:+.2}%: threshold {:+.2}, size x{:.2}",
                regime,
                stats.trades,
                stats.win_rate * 100.0,
                stats.mean_return * 100.0,
                delta,
                factor
            ));
        }

        if risk_score > HIGH_RISK {
            params.position_multiplier *= 0.6;
            params.confidence_threshold += 0.05;
            params.adaptive_reasoning.push(format!(
                "High overall risk ({:.2}): size x0.6, threshold +0.05",
                risk_score
            ));
        }

        let threshold = params
            .confidence_threshold
            .clamp(MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD);
        if threshold != params.confidence_threshold {
            params.adaptive_reasoning.push(format!(
                "Confidence threshold clamped to {:.2}",
                threshold
            ));
            params.confidence_threshold = threshold;
        }
        params.position_multiplier = params
            .position_multiplier
            .clamp(MIN_POSITION_MULTIPLIER, MAX_POSITION_MULTIPLIER);

        params.validate().map_err(|e| {
            EngineError::Configuration(format!("adapted parameters out of bounds: {}", e))
        })?;

        debug!(
            regime = %regime,
            risk_score,
            threshold = params.confidence_threshold,
            multiplier = params.position_multiplier,
            "Adapted parameters"
        );

        Ok(params)
    }
}
