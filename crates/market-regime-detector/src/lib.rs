use analysis_core::{EngineError, IndicatorSet, MarketRegime};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default ATR/close ratio above which the market counts as volatile.
pub const DEFAULT_VOLATILITY_CEILING: f64 = 0.03;

/// Regime classification with the features that drove it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeDetectionResult {
    pub regime: MarketRegime,
    /// ATR as a fraction of the last close
    pub normalized_volatility: Option<f64>,
    pub reasoning: String,
}

/// Rule-based market regime detector.
///
/// Stateless: the same indicator set always yields the same regime. There is
/// no hysteresis, so a market sitting on the volatility ceiling can alternate
/// between `Volatile` and a trend regime from one tick to the next.
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    volatility_ceiling: f64,
}

impl RegimeDetector {
    pub fn new() -> Self {
        Self {
            volatility_ceiling: DEFAULT_VOLATILITY_CEILING,
        }
    }

    /// Create a detector with a custom volatility ceiling
    pub fn with_volatility_ceiling(ceiling: f64) -> Result<Self, EngineError> {
        if !(ceiling > 0.0 && ceiling.is_finite()) {
            return Err(EngineError::Configuration(format!(
                "volatility ceiling must be positive, got {}",
                ceiling
            )));
        }
        Ok(Self {
            volatility_ceiling: ceiling,
        })
    }

    pub fn volatility_ceiling(&self) -> f64 {
        self.volatility_ceiling
    }

    pub fn classify(&self, indicators: &IndicatorSet) -> MarketRegime {
        self.detect(indicators).regime
    }

    /// Classify and explain. Rule order: volatility first, then the EMA stack.
    pub fn detect(&self, indicators: &IndicatorSet) -> RegimeDetectionResult {
        let normalized_volatility = indicators.normalized_atr();

        let (regime, reasoning) = match normalized_volatility {
            Some(vol) if vol > self.volatility_ceiling => (
                MarketRegime::Volatile,
                format!(
                    "ATR {:.2}% of price exceeds {:.2}% ceiling",
                    vol * 100.0,
                    self.volatility_ceiling * 100.0
                ),
            ),
            Some(_) => match (indicators.ema_9, indicators.ema_21, indicators.ema_50) {
                (Some(e9), Some(e21), Some(e50)) if e9 > e21 && e21 > e50 => {
                    (MarketRegime::Bull, "EMA 9 > 21 > 50".to_string())
                }
                (Some(e9), Some(e21), Some(e50)) if e9 < e21 && e21 < e50 => {
                    (MarketRegime::Bear, "EMA 9 < 21 < 50".to_string())
                }
                (Some(_), Some(_), Some(_)) => {
                    (MarketRegime::Sideways, "EMAs not stacked".to_string())
                }
                _ => (MarketRegime::Sideways, "Trend features unavailable".to_string()),
            },
            None => (
                MarketRegime::Sideways,
                "Volatility feature unavailable".to_string(),
            ),
        };

        debug!(regime = %regime, ?normalized_volatility, "Classified market regime");

        RegimeDetectionResult {
            regime,
            normalized_volatility,
            reasoning,
        }
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn indicators(e9: f64, e21: f64, e50: f64, atr: f64) -> IndicatorSet {
        IndicatorSet {
            close: 100.0,
            ema_9: Some(e9),
            ema_21: Some(e21),
            ema_50: Some(e50),
            atr: Some(atr),
            ..IndicatorSet::default()
        }
    }

    #[test]
    fn test_bull_stack() {
        let detector = RegimeDetector::new();
        assert_eq!(detector.classify(&indicators(105.0, 102.0, 98.0, 1.0)), MarketRegime::Bull);
    }

    #[test]
    fn test_bear_stack() {
        let detector = RegimeDetector::new();
        assert_eq!(detector.classify(&indicators(95.0, 98.0, 102.0, 1.0)), MarketRegime::Bear);
    }

    #[test]
    fn test_unstacked_is_sideways() {
        let detector = RegimeDetector::new();
        assert_eq!(detector.classify(&indicators(101.0, 99.0, 100.0, 1.0)), MarketRegime::Sideways);
    }

    #[test]
    fn test_volatility_overrides_trend() {
        let detector = RegimeDetector::new();
        // ATR 4% of price
        let result = detector.detect(&indicators(105.0, 102.0, 98.0, 4.0));
        assert_eq!(result.regime, MarketRegime::Volatile);
        assert!(result.reasoning.contains("exceeds"));
    }

    #[test]
    fn test_missing_features_default_to_sideways() {
        let detector = RegimeDetector::new();
        let mut ind = indicators(105.0, 102.0, 98.0, 1.0);
        ind.atr = None;
        assert_eq!(detector.classify(&ind), MarketRegime::Sideways);

        let mut ind = indicators(105.0, 102.0, 98.0, 1.0);
        ind.ema_50 = None;
        assert_eq!(detector.classify(&ind), MarketRegime::Sideways);

        assert_eq!(detector.classify(&IndicatorSet::default()), MarketRegime::Sideways);
    }

    #[test]
    fn test_volatility_does_not_need_trend_features() {
        let detector = RegimeDetector::new();
        // ATR 10% of price with only a partial EMA history
        let mut ind = indicators(105.0, 102.0, 98.0, 10.0);
        ind.ema_50 = None;
        let result = detector.detect(&ind);
        assert_eq!(result.regime, MarketRegime::Volatile);
        assert!(result.reasoning.contains("exceeds"));

        let ind = IndicatorSet {
            close: 100.0,
            atr: Some(5.0),
            ..IndicatorSet::default()
        };
        assert_eq!(detector.classify(&ind), MarketRegime::Volatile);
    }

    #[test]
    fn test_custom_ceiling() {
        let detector = RegimeDetector::with_volatility_ceiling(0.05).unwrap();
        assert_eq!(detector.classify(&indicators(105.0, 102.0, 98.0, 4.0)), MarketRegime::Bull);
        assert!(RegimeDetector::with_volatility_ceiling(0.0).is_err());
        assert!(RegimeDetector::with_volatility_ceiling(f64::NAN).is_err());
    }

    #[test]
    fn test_ceiling_boundary_is_exclusive() {
        let detector = RegimeDetector::new();
        // exactly at the ceiling is not volatile
        assert_eq!(detector.classify(&indicators(105.0, 102.0, 98.0, 3.0)), MarketRegime::Bull);
        assert_eq!(detector.classify(&indicators(105.0, 102.0, 98.0, 3.0001)), MarketRegime::Volatile);
    }

    #[test]
    fn test_flapping_near_ceiling() {
        // ATR oscillating a hair around 3% flips the regime every tick
        let detector = RegimeDetector::new();
        let regimes: Vec<MarketRegime> = (0..10)
            .map(|i| {
                let atr = if i % 2 == 0 { 2.99 } else { 3.01 };
                detector.classify(&indicators(105.0, 102.0, 98.0, atr))
            })
            .collect();

        for (i, regime) in regimes.iter().enumerate() {
            let expected = if i % 2 == 0 { MarketRegime::Bull } else { MarketRegime::Volatile };
            assert_eq!(*regime, expected);
        }
        let transitions = regimes.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(transitions, 9);
    }

    #[test]
    fn test_deterministic_over_random_inputs() {
        let detector = RegimeDetector::new();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..1000 {
            let ind = IndicatorSet {
                close: rng.gen_range(1.0..200.0),
                ema_9: Some(rng.gen_range(1.0..200.0)),
                ema_21: Some(rng.gen_range(1.0..200.0)),
                ema_50: Some(rng.gen_range(1.0..200.0)),
                atr: Some(rng.gen_range(0.0..10.0)),
                ..IndicatorSet::default()
            };
            let first = detector.detect(&ind);
            for _ in 0..3 {
                assert_eq!(detector.detect(&ind), first);
            }
        }
    }
}
