#[cfg(test)]
mod var_tests {
    use crate::var::*;
    use analysis_core::ReturnPoint;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// 100 evenly spaced returns from -5% to +4.9%
    fn ladder() -> Vec<f64> {
        (0..100).map(|i| i as f64 / 1000.0 - 0.05).collect()
    }

    #[test]
    fn test_var_takes_tail_boundary() {
        let var = historical_var(&ladder(), 1.0, 0.95).unwrap();
        // five observations in the 5% tail; the boundary is the fifth worst
        assert_relative_eq!(var, 0.046, epsilon = 1e-12);
    }

    #[test]
    fn test_expected_shortfall_is_tail_mean() {
        let es = historical_expected_shortfall(&ladder(), 1.0, 0.95).unwrap();
        assert_relative_eq!(es, 0.048, epsilon = 1e-12);
    }

    #[test]
    fn test_horizon_scale_multiplies() {
        let one_day = historical_var(&ladder(), 1.0, 0.95).unwrap();
        let week = historical_var(&ladder(), 7f64.sqrt(), 0.95).unwrap();
        assert_relative_eq!(week, one_day * 7f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_thin_history_is_none() {
        let returns = vec![-0.01; 9];
        assert!(historical_var(&returns, 1.0, 0.95).is_none());
        assert!(historical_expected_shortfall(&returns, 1.0, 0.95).is_none());
    }

    #[test]
    fn test_no_losses_means_zero_var() {
        let returns: Vec<f64> = (1..=50).map(|i| i as f64 / 1000.0).collect();
        assert_eq!(historical_var(&returns, 1.0, 0.95), Some(0.0));
        assert_eq!(historical_expected_shortfall(&returns, 1.0, 0.95), Some(0.0));
    }

    #[test]
    fn test_non_finite_returns_ignored() {
        let mut returns = ladder();
        returns.push(f64::NAN);
        returns.push(f64::NEG_INFINITY);
        assert_relative_eq!(historical_var(&returns, 1.0, 0.95).unwrap(), 0.046, epsilon = 1e-12);
    }

    #[test]
    fn test_shortfall_never_below_var() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let n = rng.gen_range(10..300);
            let returns: Vec<f64> = (0..n).map(|_| rng.gen_range(-0.1..0.1)).collect();
            for confidence in [0.9, 0.95, 0.99] {
                let var = historical_var(&returns, 1.0, confidence).unwrap();
                let es = historical_expected_shortfall(&returns, 1.0, confidence).unwrap();
                assert!(es + 1e-12 >= var, "es {} < var {}", es, var);
            }
        }
    }

    #[test]
    fn test_default_aggregator_panel() {
        let report = MultiHorizonRiskAggregator::default().aggregate(&ladder(), 1.0);

        let labels: Vec<&str> = report.var_series.iter().map(|p| p.horizon.as_str()).collect();
        assert_eq!(labels, vec!["1d", "1w", "1m"]);
        assert_eq!(report.es_series.len(), 3);

        let base = report.var_series[0].var;
        assert_relative_eq!(report.var_series[1].var, base * 7f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(report.var_series[2].var, base * 30f64.sqrt(), epsilon = 1e-12);
        for (v, e) in report.var_series.iter().zip(&report.es_series) {
            assert!(e.cvar >= v.var);
        }
    }

    #[test]
    fn test_aggregator_without_history_reports_zero() {
        let report = MultiHorizonRiskAggregator::default().aggregate(&[], 24.0);
        assert!(report.var_series.iter().all(|p| p.var == 0.0));
        assert!(report.es_series.iter().all(|p| p.cvar == 0.0));
    }

    #[test]
    fn test_hourly_returns_scale_by_bars_per_day() {
        let daily = MultiHorizonRiskAggregator::default().aggregate(&ladder(), 1.0);
        let hourly = MultiHorizonRiskAggregator::default().aggregate(&ladder(), 24.0);

        assert_relative_eq!(
            hourly.var_series[0].var,
            daily.var_series[0].var * 24f64.sqrt(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            hourly.es_series[2].cvar,
            daily.es_series[0].cvar * (24.0f64 * 30.0).sqrt(),
            epsilon = 1e-12
        );
    }

    fn stamped(values: &[f64], offset_hours: i64) -> Vec<ReturnPoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| ReturnPoint {
                timestamp: start + Duration::hours(i as i64 + offset_hours),
                value,
            })
            .collect()
    }

    #[test]
    fn test_combine_returns_weights_by_capital() {
        let a = stamped(&[0.01, -0.02, 0.03], 0);
        let b = stamped(&[0.03, 0.02, -0.01], 0);
        let combined = combine_returns(&[
            PortfolioSleeve { weight: 3_000.0, returns: &a },
            PortfolioSleeve { weight: 1_000.0, returns: &b },
        ]);

        assert_eq!(combined.len(), 3);
        assert_relative_eq!(combined[0], 0.75 * 0.01 + 0.25 * 0.03, epsilon = 1e-12);
        assert_relative_eq!(combined[1], 0.75 * -0.02 + 0.25 * 0.02, epsilon = 1e-12);
        assert_relative_eq!(combined[2], 0.75 * 0.03 + 0.25 * -0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_combine_returns_keeps_shared_bars_only() {
        let a = stamped(&[0.01, 0.02, 0.03, 0.04], 0);
        // one bar later: overlaps on three bars
        let b = stamped(&[0.01, 0.01, 0.01, 0.01], 1);
        let combined = combine_returns(&[
            PortfolioSleeve { weight: 0.0, returns: &a },
            PortfolioSleeve { weight: 0.0, returns: &b },
        ]);

        // no capital known: equal weights
        assert_eq!(combined.len(), 3);
        assert_relative_eq!(combined[0], 0.5 * 0.02 + 0.5 * 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_single_sleeve_is_its_own_series() {
        let values: Vec<f64> = ladder();
        let a = stamped(&values, 0);
        let combined = combine_returns(&[PortfolioSleeve { weight: 10_000.0, returns: &a }]);
        assert_eq!(combined, values);
        assert!(combine_returns(&[]).is_empty());
    }

    #[test]
    fn test_report_serializes_series() {
        let report = MultiHorizonRiskAggregator::default().aggregate(&ladder(), 1.0);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["var_series"][0]["horizon"], "1d");
        assert!(json["es_series"][2]["cvar"].as_f64().unwrap() > 0.0);
    }
}

#[cfg(test)]
mod scorer_tests {
    use crate::scorer::*;
    use analysis_core::{AccountState, Candle, EquityPoint, OpenPosition, Timeframe};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn candles_from(closes: &[f64], volume: f64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close * 1.005,
                low: close * 0.995,
                close,
                volume,
            })
            .collect()
    }

    fn calm_uptrend() -> Vec<f64> {
        (0..120).map(|i| 100.0 * (1.0 + 0.001 * i as f64) + (i % 2) as f64 * 0.05).collect()
    }

    fn choppy() -> Vec<f64> {
        (0..120)
            .map(|i| if i % 2 == 0 { 100.0 } else { 100.0 * (1.0 + 0.06 * ((i % 5) as f64 - 2.0)) })
            .collect()
    }

    #[test]
    fn test_missing_inputs_are_neutral() {
        let metrics = RiskScorer::new(Timeframe::Day1).score(&RiskInputs::default());
        assert_relative_eq!(metrics.overall_risk_score, 0.5, epsilon = 1e-12);
        assert_relative_eq!(metrics.liquidity_risk, 0.5);
        assert_relative_eq!(metrics.concentration_risk, 0.5);
    }

    #[test]
    fn test_calm_market_scores_lower_than_choppy() {
        let scorer = RiskScorer::new(Timeframe::Day1);
        let calm = candles_from(&calm_uptrend(), 1_000_000.0);
        let wild = candles_from(&choppy(), 1_000_000.0);

        let calm_metrics = scorer.score(&RiskInputs { candles: &calm, ..Default::default() });
        let wild_metrics = scorer.score(&RiskInputs { candles: &wild, ..Default::default() });

        assert!(calm_metrics.overall_risk_score < wild_metrics.overall_risk_score);
        assert!(calm_metrics.volatility < wild_metrics.volatility);
        assert!(calm_metrics.sharpe_ratio > 0.0);
        assert!(wild_metrics.var95 > calm_metrics.var95);
        assert!(wild_metrics.var99 >= wild_metrics.var95);
    }

    #[test]
    fn test_volatility_is_annualized_with_crypto_calendar() {
        let candles = candles_from(&choppy(), 1_000_000.0);
        let daily = RiskScorer::new(Timeframe::Day1).score(&RiskInputs { candles: &candles, ..Default::default() });
        let hourly = RiskScorer::new(Timeframe::Hour1).score(&RiskInputs { candles: &candles, ..Default::default() });

        // same returns, 24x the periods per year
        assert_relative_eq!(hourly.volatility / daily.volatility, 24f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_drawdown_prefers_equity_curve() {
        let candles = candles_from(&calm_uptrend(), 1_000_000.0);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let equity: Vec<EquityPoint> = [10_000.0, 11_000.0, 8_800.0, 9_500.0]
            .iter()
            .enumerate()
            .map(|(i, &e)| EquityPoint { timestamp: start + Duration::days(i as i64), equity: e })
            .collect();

        let metrics = RiskScorer::new(Timeframe::Day1).score(&RiskInputs {
            candles: &candles,
            equity_history: &equity,
            ..Default::default()
        });
        assert_relative_eq!(metrics.max_drawdown, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_concentration_from_largest_position() {
        let account = AccountState {
            balance: 5_000.0,
            open_positions: vec![
                OpenPosition { symbol: "BTC/USDT".into(), quantity: 0.1, entry_price: 40_000.0, current_price: 40_000.0 },
                OpenPosition { symbol: "ETH/USDT".into(), quantity: 0.5, entry_price: 2_000.0, current_price: 2_000.0 },
            ],
        };
        let metrics = RiskScorer::new(Timeframe::Day1).score(&RiskInputs {
            account: Some(&account),
            ..Default::default()
        });
        // 4000 of 10000 equity in BTC
        assert_relative_eq!(metrics.concentration_risk, 0.4, epsilon = 1e-12);
        assert_relative_eq!(metrics.diversification_ratio, 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_book_is_neutral_not_low_risk() {
        let account = AccountState { balance: 10_000.0, open_positions: vec![] };
        let scorer = RiskScorer::new(Timeframe::Day1);
        let metrics = scorer.score(&RiskInputs {
            account: Some(&account),
            ..Default::default()
        });
        assert_eq!(metrics.concentration_risk, 0.5);
        assert_eq!(metrics.diversification_ratio, 0.5);

        // a fresh bot with a cash-only book scores the same as one with no account at all
        let candles = candles_from(&calm_uptrend(), 1_000_000.0);
        let with_book = scorer.score(&RiskInputs {
            candles: &candles,
            account: Some(&account),
            ..Default::default()
        });
        let without = scorer.score(&RiskInputs { candles: &candles, ..Default::default() });
        assert_relative_eq!(with_book.overall_risk_score, without.overall_risk_score, epsilon = 1e-12);
    }

    #[test]
    fn test_wide_spread_and_thin_volume_raise_liquidity_risk() {
        let scorer = RiskScorer::new(Timeframe::Day1);
        let deep = candles_from(&calm_uptrend(), 1_000_000.0);
        let thin = candles_from(&calm_uptrend(), 10.0);

        let deep_metrics = scorer.score(&RiskInputs { candles: &deep, spread_pct: Some(0.0001), ..Default::default() });
        let thin_metrics = scorer.score(&RiskInputs { candles: &thin, spread_pct: Some(0.02), ..Default::default() });

        assert!(deep_metrics.liquidity_risk < 0.1);
        assert_relative_eq!(thin_metrics.liquidity_risk, 1.0);
    }

    #[test]
    fn test_window_limits_history() {
        let mut closes = choppy();
        closes.extend(calm_uptrend());
        let candles = candles_from(&closes, 1_000_000.0);

        let windowed = RiskScorer::new(Timeframe::Day1).score(&RiskInputs { candles: &candles, ..Default::default() });
        let calm_only = candles_from(&calm_uptrend(), 1_000_000.0);
        let reference = RiskScorer::new(Timeframe::Day1).score(&RiskInputs { candles: &calm_only[20..], ..Default::default() });

        assert_relative_eq!(windowed.volatility, reference.volatility, epsilon = 1e-12);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(99);
        let scorer = RiskScorer::new(Timeframe::Hour4);

        for _ in 0..200 {
            let n = rng.gen_range(0..150);
            let mut price = 100.0;
            let closes: Vec<f64> = (0..n)
                .map(|_| {
                    price *= 1.0 + rng.gen_range(-0.2..0.2);
                    price
                })
                .collect();
            let candles = candles_from(&closes, rng.gen_range(0.0..1e7));
            let account = AccountState {
                balance: rng.gen_range(0.0..10_000.0),
                open_positions: vec![OpenPosition {
                    symbol: "SOL/USDT".into(),
                    quantity: rng.gen_range(0.0..100.0),
                    entry_price: 100.0,
                    current_price: rng.gen_range(1.0..200.0),
                }],
            };
            let metrics = scorer.score(&RiskInputs {
                candles: &candles,
                account: Some(&account),
                spread_pct: Some(rng.gen_range(0.0..0.05)),
                ..Default::default()
            });

            for v in [
                metrics.overall_risk_score,
                metrics.liquidity_risk,
                metrics.concentration_risk,
                metrics.diversification_ratio,
            ] {
                assert!((0.0..=1.0).contains(&v), "{:?}", metrics);
            }
        }
    }
}

#[cfg(test)]
mod assessment_tests {
    use crate::assessment::*;
    use analysis_core::RiskMetrics;

    #[test]
    fn test_risk_level_classification() {
        assert_eq!(RiskLevel::from_score(0.1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.4), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::Elevated);
        assert_eq!(RiskLevel::from_score(0.75), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.95), RiskLevel::Critical);
    }

    #[test]
    fn test_high_risk_recommends_reducing_exposure() {
        let metrics = RiskMetrics {
            overall_risk_score: 0.75,
            ..RiskMetrics::neutral()
        };
        let recs = recommendations(&metrics);
        assert_eq!(recs[0], "High risk: reduce exposure and position sizing");
        assert!(recs.iter().any(|r| r.contains("reduce exposure")));
    }

    #[test]
    fn test_moderate_warning_band() {
        let metrics = RiskMetrics {
            overall_risk_score: 0.6,
            ..RiskMetrics::neutral()
        };
        let recs = recommendations(&metrics);
        assert!(recs[0].starts_with("Moderate risk"));
        assert!(!recs.iter().any(|r| r.starts_with("High risk")));
    }

    #[test]
    fn test_low_risk_has_no_overall_warning() {
        let metrics = RiskMetrics {
            overall_risk_score: 0.3,
            concentration_risk: 0.1,
            ..RiskMetrics::neutral()
        };
        assert!(recommendations(&metrics).is_empty());
    }

    #[test]
    fn test_dimension_hints() {
        let metrics = RiskMetrics {
            volatility: 1.2,
            max_drawdown: 0.25,
            concentration_risk: 0.8,
            liquidity_risk: 0.9,
            overall_risk_score: 0.3,
            ..RiskMetrics::neutral()
        };
        let recs = recommendations(&metrics);
        assert_eq!(recs.len(), 4);
        assert!(recs[0].starts_with("Volatility is 120%"));
    }

    #[test]
    fn test_assessment_bundles_level() {
        let assessment = RiskAssessment::new(RiskMetrics {
            overall_risk_score: 0.9,
            ..RiskMetrics::neutral()
        });
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
        assert!(!assessment.recommendations.is_empty());
    }
}
