//! Risk levels and operator-facing recommendations derived from `RiskMetrics`.

use analysis_core::RiskMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall score above which a bot is considered high risk.
pub const HIGH_RISK_THRESHOLD: f64 = 0.7;
/// Overall score above which a moderate warning is issued.
pub const MODERATE_RISK_THRESHOLD: f64 = 0.5;

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    Elevated,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify a [0, 1] overall risk score.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s < 0.25 => RiskLevel::Low,
            s if s < 0.5 => RiskLevel::Moderate,
            s if s <= 0.7 => RiskLevel::Elevated,
            s if s < 0.85 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::Elevated => "Elevated",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

/// Recommendations for a metrics snapshot, most severe first.
pub fn recommendations(metrics: &RiskMetrics) -> Vec<String> {
    let mut recs = Vec::new();

    if metrics.overall_risk_score > HIGH_RISK_THRESHOLD {
        recs.push("High risk: reduce exposure and position sizing".to_string());
    } else if metrics.overall_risk_score > MODERATE_RISK_THRESHOLD {
        recs.push("Moderate risk: monitor positions closely".to_string());
    }

    if metrics.volatility > 0.8 {
        recs.push(format!(
            "Volatility is {:.0}% annualized. Consider widening stops and trading smaller.",
            metrics.volatility * 100.0
        ));
    }
    if metrics.max_drawdown > 0.15 {
        recs.push(format!(
            "Drawdown reached {:.1}%. Consider pausing new entries.",
            metrics.max_drawdown * 100.0
        ));
    }
    if metrics.concentration_risk > 0.5 {
        recs.push(format!(
            "{:.0}% of equity sits in one asset. Consider reducing exposure.",
            metrics.concentration_risk * 100.0
        ));
    }
    if metrics.liquidity_risk > 0.7 {
        recs.push("Liquidity is thin. Use limit orders and smaller clips.".to_string());
    }

    recs
}

/// Metrics bundled with their classification, as served to dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub metrics: RiskMetrics,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn new(metrics: RiskMetrics) -> Self {
        let risk_level = RiskLevel::from_score(metrics.overall_risk_score);
        let recommendations = recommendations(&metrics);
        Self {
            metrics,
            risk_level,
            recommendations,
            generated_at: Utc::now(),
        }
    }
}
