use analysis_core::{stats::clamp_unit, IndicatorSet, TradeAction};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// |score| below this is treated as no edge.
const HOLD_BAND: f64 = 0.1;
const VOLUME_SPIKE_RATIO: f64 = 1.5;
const VOLUME_BONUS: f64 = 0.1;
const LEVEL_PROXIMITY: f64 = 0.02;

/// Weight of each indicator group in the fused score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupWeights {
    pub trend: f64,
    pub momentum: f64,
    pub volatility: f64,
}

impl Default for GroupWeights {
    fn default() -> Self {
        Self {
            trend: 0.30,
            momentum: 0.40,
            volatility: 0.30,
        }
    }
}

impl GroupWeights {
    /// Redistribute weight over the groups that are available so the result sums to 1.
    /// All weights are zero when no group is available.
    pub fn renormalized(&self, trend: bool, momentum: bool, volatility: bool) -> GroupWeights {
        let keep = |w: f64, available: bool| if available { w.max(0.0) } else { 0.0 };
        let (t, m, v) = (
            keep(self.trend, trend),
            keep(self.momentum, momentum),
            keep(self.volatility, volatility),
        );
        let total = t + m + v;
        if total <= 0.0 {
            return GroupWeights { trend: 0.0, momentum: 0.0, volatility: 0.0 };
        }
        GroupWeights {
            trend: t / total,
            momentum: m / total,
            volatility: v / total,
        }
    }
}

/// Fused signal before any risk or threshold gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedSignal {
    pub action: TradeAction,
    pub confidence: f64,
    pub strength: f64,
    /// Weighted score in [-1, 1]
    pub score: f64,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Trend,
    Momentum,
    Volatility,
}

/// Fuses the indicator groups into one weighted vote.
#[derive(Debug, Clone, Default)]
pub struct SignalSynthesizer {
    weights: GroupWeights,
}

impl SignalSynthesizer {
    pub fn new(weights: GroupWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &GroupWeights {
        &self.weights
    }

    pub fn synthesize(&self, ind: &IndicatorSet) -> SynthesizedSignal {
        let mut reasoning = Vec::new();

        let groups = [
            (Group::Trend, trend_votes(ind, &mut reasoning)),
            (Group::Momentum, momentum_votes(ind, &mut reasoning)),
            (Group::Volatility, volatility_votes(ind, &mut reasoning)),
        ];

        let weights = self.weights.renormalized(
            !groups[0].1.is_empty(),
            !groups[1].1.is_empty(),
            !groups[2].1.is_empty(),
        );
        let weight_of = |g: Group| match g {
            Group::Trend => weights.trend,
            Group::Momentum => weights.momentum,
            Group::Volatility => weights.volatility,
        };

        let available: Vec<(Group, f64, &Vec<f64>)> = groups
            .iter()
            .filter(|(_, votes)| !votes.is_empty())
            .map(|(g, votes)| (*g, weight_of(*g), votes))
            .collect();

        if available.is_empty() {
            reasoning.push("No indicators available".to_string());
            return SynthesizedSignal {
                action: TradeAction::Hold,
                confidence: 0.0,
                strength: 0.0,
                score: 0.0,
                reasoning,
            };
        }

        let total_weight: f64 = available.iter().map(|(_, w, _)| w).sum();
        let score = available
            .iter()
            .map(|(_, w, votes)| w * group_vote(votes))
            .sum::<f64>()
            / total_weight;
        let score = score.clamp(-1.0, 1.0);

        let action = if score.abs() < HOLD_BAND {
            TradeAction::Hold
        } else if score > 0.0 {
            TradeAction::Buy
        } else {
            TradeAction::Sell
        };

        let agreement = agreement(&available, score);
        let bonus = if volume_confirms(ind, score, &mut reasoning) { VOLUME_BONUS } else { 0.0 };
        let confidence = clamp_unit(0.5 * score.abs() + 0.5 * agreement + bonus);
        let strength = clamp_unit(score.abs());

        debug!(score, agreement, confidence, action = %action, "Synthesized signal");

        SynthesizedSignal {
            action,
            confidence,
            strength,
            score,
            reasoning,
        }
    }
}

fn group_vote(votes: &[f64]) -> f64 {
    votes.iter().sum::<f64>() / votes.len() as f64
}

/// Weighted fraction of non-zero votes that share the sign of `score`.
/// Groups whose votes are all zero carry no opinion and are left out.
fn agreement(groups: &[(Group, f64, &Vec<f64>)], score: f64) -> f64 {
    if score == 0.0 {
        return 0.0;
    }
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for (_, weight, votes) in groups {
        let opinions: Vec<f64> = votes.iter().copied().filter(|v| *v != 0.0).collect();
        if opinions.is_empty() {
            continue;
        }
        let agreeing = opinions.iter().filter(|v| v.signum() == score.signum()).count();
        weighted += weight * agreeing as f64 / opinions.len() as f64;
        weight_sum += weight;
    }
    if weight_sum > 0.0 {
        weighted / weight_sum
    } else {
        0.0
    }
}

fn trend_votes(ind: &IndicatorSet, reasoning: &mut Vec<String>) -> Vec<f64> {
    let mut votes = Vec::new();

    if let (Some(e9), Some(e21)) = (ind.ema_9, ind.ema_21) {
        let vote = match ind.ema_50 {
            Some(e50) if e9 > e21 && e21 > e50 => {
                reasoning.push("EMA stack bullish (9 > 21 > 50)".to_string());
                1.0
            }
            Some(e50) if e9 < e21 && e21 < e50 => {
                reasoning.push("EMA stack bearish (9 < 21 < 50)".to_string());
                -1.0
            }
            _ if e9 > e21 => {
                reasoning.push("EMA 9 above EMA 21".to_string());
                0.5
            }
            _ if e9 < e21 => {
                reasoning.push("EMA 9 below EMA 21".to_string());
                -0.5
            }
            _ => 0.0,
        };
        votes.push(vote);
    }

    if let Some(e50) = ind.ema_50 {
        let vote = if ind.close > e50 {
            reasoning.push("Price above EMA 50".to_string());
            0.5
        } else if ind.close < e50 {
            reasoning.push("Price below EMA 50".to_string());
            -0.5
        } else {
            0.0
        };
        votes.push(vote);
    }

    votes
}

fn momentum_votes(ind: &IndicatorSet, reasoning: &mut Vec<String>) -> Vec<f64> {
    let mut votes = Vec::new();

    if let Some(rsi) = ind.rsi {
        let vote = if rsi < 30.0 {
            reasoning.push(format!("RSI oversold ({:.1})", rsi));
            1.0
        } else if rsi > 70.0 {
            reasoning.push(format!("RSI overbought ({:.1})", rsi));
            -1.0
        } else {
            (50.0 - rsi) / 40.0
        };
        votes.push(vote);
    }

    if let Some(hist) = ind.macd_histogram {
        let vote = match ind.macd_prev_histogram {
            Some(prev) if hist > 0.0 && prev <= 0.0 => {
                reasoning.push("MACD bullish crossover".to_string());
                1.0
            }
            Some(prev) if hist < 0.0 && prev >= 0.0 => {
                reasoning.push("MACD bearish crossover".to_string());
                -1.0
            }
            _ if hist > 0.0 => 0.5,
            _ if hist < 0.0 => -0.5,
            _ => 0.0,
        };
        votes.push(vote);
    }

    if let Some(k) = ind.stoch_k {
        let vote = if k < 20.0 {
            reasoning.push(format!("Stochastic oversold (%K {:.1})", k));
            1.0
        } else if k > 80.0 {
            reasoning.push(format!("Stochastic overbought (%K {:.1})", k));
            -1.0
        } else {
            0.0
        };
        votes.push(vote);
    }

    votes
}

fn volatility_votes(ind: &IndicatorSet, reasoning: &mut Vec<String>) -> Vec<f64> {
    let mut votes = Vec::new();

    if let Some(pct_b) = ind.bollinger_percent_b() {
        let vote = if pct_b < 0.2 {
            reasoning.push(format!("Price near lower Bollinger band (%B {:.2})", pct_b));
            1.0
        } else if pct_b > 0.8 {
            reasoning.push(format!("Price near upper Bollinger band (%B {:.2})", pct_b));
            -1.0
        } else {
            (1.0 - 2.0 * pct_b) * 0.5
        };
        votes.push(vote);
    }

    if ind.close > 0.0 {
        if let Some(support) = ind.support {
            if support <= ind.close && (ind.close - support) / ind.close <= LEVEL_PROXIMITY {
                reasoning.push(format!("Price near support ({:.2})", support));
                votes.push(0.5);
            }
        }
        if let Some(resistance) = ind.resistance {
            if resistance >= ind.close && (resistance - ind.close) / ind.close <= LEVEL_PROXIMITY {
                reasoning.push(format!("Price near resistance ({:.2})", resistance));
                votes.push(-0.5);
            }
        }
    }

    votes
}

/// A volume spike confirms the score direction unless OBV points the other way.
fn volume_confirms(ind: &IndicatorSet, score: f64, reasoning: &mut Vec<String>) -> bool {
    let ratio = match ind.volume_ratio() {
        Some(r) if r > VOLUME_SPIKE_RATIO => r,
        _ => return false,
    };
    reasoning.push(format!("Volume spike ({:.1}x average)", ratio));

    if score.abs() < HOLD_BAND {
        return false;
    }
    match (ind.obv, ind.obv_sma) {
        (Some(obv), Some(avg)) => {
            let obv_bullish = obv > avg;
            if obv_bullish == (score > 0.0) {
                reasoning.push(format!(
                    "OBV confirms {} pressure",
                    if obv_bullish { "buying" } else { "selling" }
                ));
                true
            } else {
                false
            }
        }
        _ => true,
    }
}
