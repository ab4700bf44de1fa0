use analysis_core::{Candle, EngineError, IndicatorSet};
use tracing::debug;

use crate::indicators::*;

/// Minimum window length the bank will evaluate.
pub const MIN_CANDLES: usize = 100;

const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;
const BB_STD_DEV: f64 = 2.0;
const STOCH_K: usize = 14;
const STOCH_D: usize = 3;
const VOLUME_AVG_PERIOD: usize = 20;
const SR_LOOKBACK: usize = 30;

/// Computes the fixed indicator set for the most recent bar of a candle window.
#[derive(Debug, Clone, Default)]
pub struct IndicatorBank;

impl IndicatorBank {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, candles: &[Candle]) -> Result<IndicatorSet, EngineError> {
        if candles.len() < MIN_CANDLES {
            return Err(EngineError::InsufficientData(format!(
                "need at least {} candles, got {}",
                MIN_CANDLES,
                candles.len()
            )));
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let last = &candles[candles.len() - 1];

        let macd_result = macd(&closes, 12, 26, 9);
        let bb = bollinger_bands(&closes, BB_PERIOD, BB_STD_DEV);
        let stoch = stochastic(candles, STOCH_K, STOCH_D);
        let obv_values = obv(candles);
        let levels = support_resistance(candles, SR_LOOKBACK);

        let set = IndicatorSet {
            close: last.close,
            ema_9: last_finite(&ema(&closes, 9)),
            ema_21: last_finite(&ema(&closes, 21)),
            ema_50: last_finite(&ema(&closes, 50)),
            rsi: last_finite(&rsi(&closes, RSI_PERIOD)),
            macd_line: last_finite(&macd_result.macd_line),
            macd_signal: last_finite(&macd_result.signal_line),
            macd_histogram: last_finite(&macd_result.histogram),
            macd_prev_histogram: nth_from_end(&macd_result.histogram, 1),
            bb_upper: last_finite(&bb.upper),
            bb_middle: last_finite(&bb.middle),
            bb_lower: last_finite(&bb.lower),
            atr: last_finite(&atr(candles, ATR_PERIOD)),
            stoch_k: last_finite(&stoch.k),
            stoch_d: last_finite(&stoch.d),
            obv: last_finite(&obv_values),
            obv_sma: last_finite(&sma(&obv_values, VOLUME_AVG_PERIOD)),
            support: levels.support.filter(|v| v.is_finite()),
            resistance: levels.resistance.filter(|v| v.is_finite()),
            volume: last.volume,
            volume_sma: last_finite(&sma(&volumes, VOLUME_AVG_PERIOD)),
        };

        debug!(
            close = set.close,
            rsi = ?set.rsi,
            atr = ?set.atr,
            macd_histogram = ?set.macd_histogram,
            "Computed indicator set"
        );

        Ok(set)
    }
}

fn last_finite(values: &[f64]) -> Option<f64> {
    nth_from_end(values, 0)
}

/// NaN or infinite results (e.g. from a degenerate window) become `None`.
fn nth_from_end(values: &[f64], n: usize) -> Option<f64> {
    values
        .len()
        .checked_sub(n + 1)
        .map(|i| values[i])
        .filter(|v| v.is_finite())
}
