//! Per-bot runtime state.
//!
//! Readers take a cheap `Arc` clone of the current [`BotSnapshot`]; the bot's
//! engine builds the next snapshot off to the side and swaps it in whole, so a
//! reader never sees a half-written tick.

use analysis_core::{
    AdaptiveParameters, EngineError, EquityPoint, OrderReceipt, PositionSizingResult,
    ReturnPoint, RiskMetrics, Signal, TradeOutcome,
};
use chrono::{DateTime, Utc};
use market_regime_detector::RegimeDetectionResult;
use risk_manager::KillSwitchState;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const DEFAULT_SIGNAL_HISTORY: usize = 50;
pub const EQUITY_HISTORY_LEN: usize = 500;
pub const TRADE_OUTCOME_HISTORY_LEN: usize = 200;

/// Everything the outside world can see about one bot
#[derive(Debug, Clone, Serialize)]
pub struct BotSnapshot {
    pub bot_id: String,
    pub symbol: String,
    /// Operator-applied parameters every tick adapts from
    pub parameters: AdaptiveParameters,
    /// Parameters the last tick actually traded with
    pub effective_parameters: Option<AdaptiveParameters>,
    /// Most recent last
    pub signals: VecDeque<Signal>,
    pub regime: Option<RegimeDetectionResult>,
    pub risk_metrics: Option<RiskMetrics>,
    pub sizing: Option<PositionSizingResult>,
    pub last_order: Option<OrderReceipt>,
    pub balance: Option<f64>,
    pub equity_history: VecDeque<EquityPoint>,
    /// Close-to-close returns of the latest candle window, one per bar
    pub bar_returns: Vec<ReturnPoint>,
    /// Realized results of closed trades, most recent last
    pub trade_outcomes: VecDeque<TradeOutcome>,
    pub kill_switch: KillSwitchState,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BotSnapshot {
    fn initial(bot_id: &str, symbol: &str, parameters: AdaptiveParameters) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            symbol: symbol.to_string(),
            parameters,
            effective_parameters: None,
            signals: VecDeque::new(),
            regime: None,
            risk_metrics: None,
            sizing: None,
            last_order: None,
            balance: None,
            equity_history: VecDeque::new(),
            bar_returns: Vec::new(),
            trade_outcomes: VecDeque::new(),
            kill_switch: KillSwitchState::default(),
            updated_at: None,
        }
    }

    pub fn latest_signal(&self) -> Option<&Signal> {
        self.signals.back()
    }
}

/// Result of one tick, committed in a single swap.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub signal: Signal,
    pub regime: Option<RegimeDetectionResult>,
    pub risk_metrics: Option<RiskMetrics>,
    pub effective_parameters: Option<AdaptiveParameters>,
    pub sizing: Option<PositionSizingResult>,
    pub order: Option<OrderReceipt>,
    pub balance: Option<f64>,
    pub equity: Option<EquityPoint>,
    pub bar_returns: Option<Vec<ReturnPoint>>,
    pub trade: Option<TradeOutcome>,
    pub kill_switch: Option<KillSwitchState>,
}

impl TickOutcome {
    /// A degraded tick: only the fail-safe signal is recorded.
    pub fn degraded(signal: Signal) -> Self {
        Self {
            signal,
            regime: None,
            risk_metrics: None,
            effective_parameters: None,
            sizing: None,
            order: None,
            balance: None,
            equity: None,
            bar_returns: None,
            trade: None,
            kill_switch: None,
        }
    }
}

pub struct BotRuntimeState {
    current: RwLock<Arc<BotSnapshot>>,
    history_len: usize,
}

impl BotRuntimeState {
    pub fn new(bot_id: &str, symbol: &str, parameters: AdaptiveParameters, history_len: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(BotSnapshot::initial(bot_id, symbol, parameters))),
            history_len: history_len.max(1),
        }
    }

    pub async fn snapshot(&self) -> Arc<BotSnapshot> {
        self.current.read().await.clone()
    }

    /// Commit a tick. Analysis fields of a degraded tick keep their previous values.
    pub async fn commit(&self, outcome: TickOutcome) -> Arc<BotSnapshot> {
        let mut guard = self.current.write().await;
        let mut next = BotSnapshot::clone(&guard);

        next.signals.push_back(outcome.signal);
        while next.signals.len() > self.history_len {
            next.signals.pop_front();
        }
        if outcome.regime.is_some() {
            next.regime = outcome.regime;
        }
        if outcome.risk_metrics.is_some() {
            next.risk_metrics = outcome.risk_metrics;
        }
        if outcome.effective_parameters.is_some() {
            next.effective_parameters = outcome.effective_parameters;
        }
        if outcome.sizing.is_some() {
            next.sizing = outcome.sizing;
        }
        if outcome.order.is_some() {
            next.last_order = outcome.order;
        }
        if outcome.balance.is_some() {
            next.balance = outcome.balance;
        }
        if let Some(point) = outcome.equity {
            next.equity_history.push_back(point);
            while next.equity_history.len() > EQUITY_HISTORY_LEN {
                next.equity_history.pop_front();
            }
        }
        if let Some(returns) = outcome.bar_returns {
            next.bar_returns = returns;
        }
        if let Some(trade) = outcome.trade {
            next.trade_outcomes.push_back(trade);
            while next.trade_outcomes.len() > TRADE_OUTCOME_HISTORY_LEN {
                next.trade_outcomes.pop_front();
            }
        }
        if let Some(kill_switch) = outcome.kill_switch {
            next.kill_switch = kill_switch;
        }
        next.updated_at = Some(Utc::now());

        let next = Arc::new(next);
        *guard = next.clone();
        next
    }

    /// Validate and swap in new parameters; rejected parameters leave the current set in place.
    pub async fn apply_parameters(
        &self,
        parameters: AdaptiveParameters,
    ) -> Result<Arc<BotSnapshot>, EngineError> {
        let mut guard = self.current.write().await;
        if let Err(e) = parameters.validate() {
            warn!(bot_id = %guard.bot_id, error = %e, "Rejected parameter update");
            return Err(e);
        }

        let mut next = BotSnapshot::clone(&guard);
        info!(
            bot_id = %next.bot_id,
            confidence_threshold = parameters.confidence_threshold,
            position_multiplier = parameters.position_multiplier,
            risk_per_trade = parameters.risk_per_trade,
            "Applied new parameters"
        );
        next.parameters = parameters;
        next.updated_at = Some(Utc::now());

        let next = Arc::new(next);
        *guard = next.clone();
        Ok(next)
    }
}
