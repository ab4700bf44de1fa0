//! Adaptive per-bot decision engine.
//!
//! Each bot owns a [`DecisionEngine`] driven by a [`BotRunner`]; its latest
//! decision and analysis are published through [`BotRuntimeState`].

pub mod config;
pub mod data_source;
pub mod engine;
pub mod metrics;
pub mod paper;
pub mod runner;
pub mod state;

pub use config::AgentConfig;
pub use data_source::DataSource;
pub use engine::{bar_returns, gate, Decision, DecisionEngine, EngineSettings};
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use paper::{load_candles, PaperAccount, PaperExecutor, ReplayCandleSource};
pub use runner::{BotHandle, BotRunner};
pub use state::{BotRuntimeState, BotSnapshot, TickOutcome};
