use std::collections::BTreeMap;
use std::sync::Arc;

use analysis_core::EngineError;
use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use risk_manager::MultiHorizonRiskAggregator;
use serde::{Deserialize, Serialize};
use tokio::signal::unix::SignalKind;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use trading_agent::{
    load_candles, AgentConfig, BotHandle, BotRunner, DataSource, DecisionEngine, PaperAccount,
    PaperExecutor, ReplayCandleSource,
};

mod bot_routes;
mod risk_routes;


pub use bot_routes::bot_routes;
pub use risk_routes::risk_routes;

#[derive(Clone)]
pub struct AppState {
    pub bots: Arc<BTreeMap<String, Arc<DecisionEngine>>>,
    pub horizons: Arc<MultiHorizonRiskAggregator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(engines: Vec<Arc<DecisionEngine>>) -> Self {
        let bots = engines
            .into_iter()
            .map(|engine| (engine.bot_id().to_string(), engine))
            .collect();
        Self {
            bots: Arc::new(bots),
            horizons: Arc::new(MultiHorizonRiskAggregator::default()),
            started_at: Utc::now(),
        }
    }

    pub fn bot(&self, bot_id: &str) -> Result<&Arc<DecisionEngine>, AppError> {
        self.bots
            .get(bot_id)
            .ok_or_else(|| AppError::NotFound(format!("Bot '{}' not found", bot_id)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Engine(EngineError),
    Internal(anyhow::Error),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Engine(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Engine(err @ EngineError::Configuration(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            AppError::Engine(err) => {
                tracing::error!("Engine error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            AppError::Internal(err) => {
                tracing::error!("Internal error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub bots: usize,
    pub uptime_seconds: i64,
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "ok".to_string(),
        bots: state.bots.len(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    }))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(bot_routes())
        .merge(risk_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// One engine per configured bot, wired to the replay feed and paper book when enabled.
pub fn build_engines(config: &AgentConfig) -> Result<Vec<Arc<DecisionEngine>>> {
    let candles = match &config.candle_file {
        Some(path) => Some(load_candles(path)?),
        None => {
            tracing::warn!("CANDLE_FILE not set; bots will hold until a candle feed is available");
            None
        }
    };
    let account = Arc::new(PaperAccount::new(config.initial_balance));
    if !config.paper_trading {
        tracing::warn!("PAPER_TRADING=false and no broker is attached; decisions will not be executed");
    }

    config
        .bot_ids
        .iter()
        .map(|bot_id| {
            let data_source = match &candles {
                Some(candles) => {
                    DataSource::Live(Arc::new(ReplayCandleSource::new(candles.clone())))
                }
                None => DataSource::Unavailable("no candle feed configured".to_string()),
            };
            let (account_source, executor) = if config.paper_trading {
                (
                    Some(account.clone() as Arc<dyn analysis_core::AccountSource>),
                    Some(Arc::new(PaperExecutor::new(bot_id.clone(), account.clone()))
                        as Arc<dyn analysis_core::OrderExecutor>),
                )
            } else {
                (None, None)
            };
            DecisionEngine::from_config(bot_id, config, data_source, account_source, executor)
                .map(Arc::new)
        })
        .collect()
}

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));
}

async fn shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received SIGINT");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }
}

pub async fn run_server() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting adaptive trading engine");

    let config = AgentConfig::from_env().context("failed to load configuration")?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Bots: {}", config.bot_ids.join(", "));
    tracing::info!("  Symbol: {} ({})", config.symbol, config.timeframe.as_str());
    tracing::info!("  Eval interval: {} seconds", config.eval_interval_seconds);
    tracing::info!(
        "  Base confidence threshold: {:.2}",
        config.base_parameters.confidence_threshold
    );
    tracing::info!("  Regime presets: {}", config.use_regime_presets);
    tracing::info!("  Paper trading: {}", config.paper_trading);

    let engines = build_engines(&config)?;
    let handles: Vec<BotHandle> = engines
        .iter()
        .map(|engine| BotRunner::new(engine.clone(), config.eval_interval()).spawn())
        .collect();

    let app = build_router(AppState::new(engines));
    let listener = tokio::net::TcpListener::bind(&config.api_bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.api_bind_addr))?;
    tracing::info!("API listening on http://{}", config.api_bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Stopping bots");
    for handle in handles {
        handle.stop().await;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
