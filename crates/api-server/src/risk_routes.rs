use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use risk_manager::{combine_returns, HorizonRiskReport, PortfolioSleeve};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trading_agent::BotSnapshot;

use crate::{ApiResponse, AppError, AppState};

/// Query params for the horizon panel
#[derive(Debug, Deserialize)]
pub struct HorizonQuery {
    /// One bot's sleeve; the whole portfolio when omitted
    pub bot_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizonScope {
    Portfolio,
    Bot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HorizonRiskResponse {
    pub scope: HorizonScope,
    /// Bots whose returns make up the series
    pub bots: Vec<String>,
    /// Per-bar portfolio returns behind the figures
    pub samples: usize,
    /// Bars per day used to scale one-bar figures to each horizon
    pub periods_per_day: f64,
    #[serde(flatten)]
    pub report: HorizonRiskReport,
}

pub fn risk_routes() -> Router<AppState> {
    Router::new().route("/api/risk/horizons", get(get_risk_horizons))
}

/// GET /api/risk/horizons[?bot_id=bot-1] - VaR and ES at 1d / 1w / 1m
///
/// Without `bot_id` the series is every bot's per-bar returns weighted by its
/// latest equity. Only bots on the first reporting bot's timeframe are
/// combined, so one bar means the same span for every sleeve.
async fn get_risk_horizons(
    State(state): State<AppState>,
    Query(query): Query<HorizonQuery>,
) -> Result<Json<ApiResponse<HorizonRiskResponse>>, AppError> {
    let (scope, engines) = match &query.bot_id {
        Some(bot_id) => (HorizonScope::Bot, vec![state.bot(bot_id)?.clone()]),
        None => {
            if state.bots.is_empty() {
                return Err(AppError::NotFound("No bots configured".to_string()));
            }
            (HorizonScope::Portfolio, state.bots.values().cloned().collect())
        }
    };

    let mut sleeves: Vec<(Arc<BotSnapshot>, f64)> = Vec::new();
    let mut timeframe = None;
    for engine in &engines {
        let snapshot = engine.snapshot().await;
        if snapshot.bar_returns.is_empty() {
            continue;
        }
        match timeframe {
            None => timeframe = Some(engine.timeframe()),
            Some(tf) if tf != engine.timeframe() => continue,
            Some(_) => {}
        }
        let weight = snapshot
            .equity_history
            .back()
            .map(|p| p.equity)
            .unwrap_or(1.0);
        sleeves.push((snapshot, weight));
    }

    let returns = combine_returns(
        &sleeves
            .iter()
            .map(|(snapshot, weight)| PortfolioSleeve {
                weight: *weight,
                returns: &snapshot.bar_returns,
            })
            .collect::<Vec<_>>(),
    );
    let periods_per_day = timeframe
        .or_else(|| engines.first().map(|e| e.timeframe()))
        .map(|tf| tf.periods_per_day())
        .unwrap_or(1.0);
    let report = state.horizons.aggregate(&returns, periods_per_day);

    Ok(Json(ApiResponse::success(HorizonRiskResponse {
        scope,
        bots: sleeves.iter().map(|(s, _)| s.bot_id.clone()).collect(),
        samples: returns.len(),
        periods_per_day,
        report,
    })))
}
