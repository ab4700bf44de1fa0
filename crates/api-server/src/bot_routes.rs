use analysis_core::{AdaptiveParameters, OrderReceipt, PositionSizingResult, RiskMetrics, Signal};
use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use market_regime_detector::RegimeDetectionResult;
use risk_manager::{KillSwitchState, RiskAssessment};
use serde::{Deserialize, Serialize};
use trading_agent::EngineMetricsSnapshot;

use crate::{ApiResponse, AppError, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct BotStatus {
    pub bot_id: String,
    pub symbol: String,
    pub timeframe: String,
    /// A candle feed is attached
    pub live: bool,
    /// A tick is in progress
    pub evaluating: bool,
    /// New entries are blocked by the drawdown kill switch
    pub halted: bool,
    pub last_signal: Option<Signal>,
    pub updated_at: Option<DateTime<Utc>>,
    pub metrics: EngineMetricsSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub bot_id: String,
    pub symbol: String,
    pub signal: Signal,
    pub regime: Option<RegimeDetectionResult>,
    pub parameters: AdaptiveParameters,
    pub effective_parameters: Option<AdaptiveParameters>,
    pub sizing: Option<PositionSizingResult>,
    pub last_order: Option<OrderReceipt>,
    pub kill_switch: KillSwitchState,
    pub recent_signals: Vec<Signal>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RiskMetricsResponse {
    pub bot_id: String,
    /// False until the bot has completed a full evaluation; metrics are neutral until then
    pub computed: bool,
    pub assessment: RiskAssessment,
    pub kill_switch: KillSwitchState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OptimizeResponse {
    pub bot_id: String,
    pub parameters: AdaptiveParameters,
    /// Always false; apply with PUT /api/bots/:bot_id/parameters
    pub applied: bool,
}

pub fn bot_routes() -> Router<AppState> {
    Router::new()
        .route("/api/bots", get(list_bots))
        .route("/api/bots/:bot_id/analysis", get(get_analysis))
        .route("/api/bots/:bot_id/risk-metrics", get(get_risk_metrics))
        .route("/api/bots/:bot_id/optimize", post(optimize_parameters))
        .route("/api/bots/:bot_id/parameters", put(apply_parameters))
}

/// GET /api/bots - All bots with their latest status
async fn list_bots(State(state): State<AppState>) -> Json<ApiResponse<Vec<BotStatus>>> {
    let mut bots = Vec::with_capacity(state.bots.len());
    for engine in state.bots.values() {
        let snapshot = engine.snapshot().await;
        bots.push(BotStatus {
            bot_id: snapshot.bot_id.clone(),
            symbol: snapshot.symbol.clone(),
            timeframe: engine.timeframe().as_str().to_string(),
            live: engine.is_live(),
            evaluating: engine.is_running(),
            halted: snapshot.kill_switch.halted,
            last_signal: snapshot.latest_signal().cloned(),
            updated_at: snapshot.updated_at,
            metrics: engine.metrics().snapshot(),
        });
    }
    Json(ApiResponse::success(bots))
}

/// GET /api/bots/:bot_id/analysis - Latest signal and regime
async fn get_analysis(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<ApiResponse<AnalysisResponse>>, AppError> {
    let engine = state.bot(&bot_id)?;
    let snapshot = engine.snapshot().await;

    // A bot that has not evaluated yet reports the fail-safe hold
    let signal = snapshot
        .latest_signal()
        .cloned()
        .unwrap_or_else(Signal::insufficient_data);

    Ok(Json(ApiResponse::success(AnalysisResponse {
        bot_id: snapshot.bot_id.clone(),
        symbol: snapshot.symbol.clone(),
        signal,
        regime: snapshot.regime.clone(),
        parameters: snapshot.parameters.clone(),
        effective_parameters: snapshot.effective_parameters.clone(),
        sizing: snapshot.sizing.clone(),
        last_order: snapshot.last_order.clone(),
        kill_switch: snapshot.kill_switch.clone(),
        recent_signals: snapshot.signals.iter().rev().take(10).cloned().collect(),
        updated_at: snapshot.updated_at,
    })))
}

/// GET /api/bots/:bot_id/risk-metrics - Risk metrics with recommendations
async fn get_risk_metrics(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<ApiResponse<RiskMetricsResponse>>, AppError> {
    let engine = state.bot(&bot_id)?;
    let snapshot = engine.snapshot().await;

    let (metrics, computed) = match &snapshot.risk_metrics {
        Some(metrics) => (metrics.clone(), true),
        None => (RiskMetrics::neutral(), false),
    };

    Ok(Json(ApiResponse::success(RiskMetricsResponse {
        bot_id,
        computed,
        assessment: RiskAssessment::new(metrics),
        kill_switch: snapshot.kill_switch.clone(),
    })))
}

/// POST /api/bots/:bot_id/optimize - Propose parameters for the current regime and risk
async fn optimize_parameters(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<ApiResponse<OptimizeResponse>>, AppError> {
    let engine = state.bot(&bot_id)?;
    let parameters = engine.optimize().await?;

    tracing::info!(
        bot_id = %bot_id,
        confidence_threshold = parameters.confidence_threshold,
        position_multiplier = parameters.position_multiplier,
        "Optimized parameters (not applied)"
    );

    Ok(Json(ApiResponse::success(OptimizeResponse {
        bot_id,
        parameters,
        applied: false,
    })))
}

/// PUT /api/bots/:bot_id/parameters - Validate and apply a parameter set
async fn apply_parameters(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(parameters): Json<AdaptiveParameters>,
) -> Result<Json<ApiResponse<AdaptiveParameters>>, AppError> {
    let engine = state.bot(&bot_id)?;
    let snapshot = engine.apply_parameters(parameters).await?;
    Ok(Json(ApiResponse::success(snapshot.parameters.clone())))
}
