use analysis_core::{
    AccountSource, AccountState, AdaptiveParameters, Candle, EngineError, EquityPoint,
    IndicatorSet, MarketRegime, OrderExecutor, OrderReceipt, OrderRequest, PositionSizingResult,
    ReturnPoint, RiskMetrics, Signal, Timeframe, TradeAction, TradeOutcome,
};
use anyhow::{Context, Result};
use chrono::Utc;
use market_regime_detector::RegimeDetector;
use parameter_adapter::{BaseSource, ParameterAdapter};
use position_sizer::PositionSizer;
use risk_manager::{
    DrawdownKillSwitch, KillSwitchEvent, KillSwitchState, RiskInputs, RiskScorer,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use technical_analysis::{IndicatorBank, SignalSynthesizer};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::data_source::DataSource;
use crate::metrics::EngineMetrics;
use crate::state::{BotRuntimeState, BotSnapshot, TickOutcome, DEFAULT_SIGNAL_HISTORY};

/// Loop and history settings for one engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub candle_limit: usize,
    pub fetch_timeout: Duration,
    pub signal_history_len: usize,
    pub metrics_log_interval_ticks: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            candle_limit: 200,
            fetch_timeout: Duration::from_secs(10),
            signal_history_len: DEFAULT_SIGNAL_HISTORY,
            metrics_log_interval_ticks: 10,
        }
    }
}

impl From<&AgentConfig> for EngineSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            candle_limit: config.candle_limit,
            fetch_timeout: config.fetch_timeout(),
            signal_history_len: config.signal_history_len,
            metrics_log_interval_ticks: config.metrics_log_interval_ticks,
        }
    }
}

/// What one tick decided
#[derive(Debug, Clone)]
pub struct Decision {
    pub signal: Signal,
    pub regime: Option<MarketRegime>,
    /// Parameters the decision was gated and sized with
    pub parameters: Option<AdaptiveParameters>,
    pub sizing: Option<PositionSizingResult>,
    pub order: Option<OrderReceipt>,
    pub order_error: Option<EngineError>,
}

impl Decision {
    fn degraded(signal: Signal) -> Self {
        Self {
            signal,
            regime: None,
            parameters: None,
            sizing: None,
            order: None,
            order_error: None,
        }
    }
}

/// Clears the running flag when a tick ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Per-bot evaluation pipeline.
///
/// A tick fetches candles, computes indicators once, runs regime detection,
/// signal synthesis and risk scoring over that same indicator set, adapts the
/// bot's parameters, gates the signal on the adapted confidence threshold and
/// sizes any trade. The engine is the only writer of its bot's runtime state.
///
/// Without an attached [`AccountSource`] the engine runs signal-only: buy and
/// sell decisions are published but never sized. With one attached, a failed
/// account fetch holds instead of trading blind.
pub struct DecisionEngine {
    bot_id: String,
    symbol: String,
    timeframe: Timeframe,
    settings: EngineSettings,
    data_source: DataSource,
    account: Option<Arc<dyn AccountSource>>,
    executor: Option<Arc<dyn OrderExecutor>>,
    bank: IndicatorBank,
    detector: RegimeDetector,
    synthesizer: SignalSynthesizer,
    scorer: RiskScorer,
    adapter: ParameterAdapter,
    sizer: PositionSizer,
    kill_switch: DrawdownKillSwitch,
    state: Arc<BotRuntimeState>,
    metrics: Arc<EngineMetrics>,
    running: AtomicBool,
}

impl DecisionEngine {
    pub fn new(
        bot_id: &str,
        symbol: &str,
        timeframe: Timeframe,
        base_parameters: AdaptiveParameters,
        data_source: DataSource,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        base_parameters.validate()?;

        let state = BotRuntimeState::new(
            bot_id,
            symbol,
            base_parameters,
            settings.signal_history_len,
        );
        let metrics = EngineMetrics::new(bot_id, settings.metrics_log_interval_ticks);

        Ok(Self {
            bot_id: bot_id.to_string(),
            symbol: symbol.to_string(),
            timeframe,
            settings,
            data_source,
            account: None,
            executor: None,
            bank: IndicatorBank::new(),
            detector: RegimeDetector::new(),
            synthesizer: SignalSynthesizer::default(),
            scorer: RiskScorer::new(timeframe),
            adapter: ParameterAdapter::default(),
            sizer: PositionSizer::default(),
            kill_switch: DrawdownKillSwitch::default(),
            state: Arc::new(state),
            metrics: Arc::new(metrics),
            running: AtomicBool::new(false),
        })
    }

    /// Engine for one configured bot
    pub fn from_config(
        bot_id: &str,
        config: &AgentConfig,
        data_source: DataSource,
        account: Option<Arc<dyn AccountSource>>,
        executor: Option<Arc<dyn OrderExecutor>>,
    ) -> Result<Self> {
        let detector = RegimeDetector::with_volatility_ceiling(config.regime_volatility_ceiling)
            .context("invalid REGIME_VOLATILITY_CEILING")?;
        let kill_switch = DrawdownKillSwitch::new(config.kill_switch)
            .context("invalid KILL_SWITCH_* settings")?;
        let base_source = if config.use_regime_presets {
            BaseSource::RegimePreset
        } else {
            BaseSource::Configured
        };

        let mut engine = Self::new(
            bot_id,
            &config.symbol,
            config.timeframe,
            config.base_parameters.clone(),
            data_source,
            EngineSettings::from(config),
        )
        .with_context(|| format!("failed to build engine for bot {bot_id}"))?
        .with_detector(detector)
        .with_adapter(
            ParameterAdapter::new(base_source).with_min_trades(config.performance_min_trades),
        )
        .with_kill_switch(kill_switch);

        if let Some(account) = account {
            engine = engine.with_account(account);
        }
        if let Some(executor) = executor {
            engine = engine.with_executor(executor);
        }
        Ok(engine)
    }

    pub fn with_account(mut self, account: Arc<dyn AccountSource>) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn OrderExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_detector(mut self, detector: RegimeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_adapter(mut self, adapter: ParameterAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_scorer(mut self, scorer: RiskScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_sizer(mut self, sizer: PositionSizer) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn with_kill_switch(mut self, kill_switch: DrawdownKillSwitch) -> Self {
        self.kill_switch = kill_switch;
        self
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn is_live(&self) -> bool {
        self.data_source.is_live()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> &Arc<BotRuntimeState> {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub async fn snapshot(&self) -> Arc<BotSnapshot> {
        self.state.snapshot().await
    }

    /// Run one tick unless one is already running; a skipped tick is counted, not queued.
    pub async fn try_tick(&self) -> Option<Decision> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.record_skipped();
            debug!(bot_id = %self.bot_id, "Tick already in progress, skipping");
            return None;
        }
        let _guard = RunningGuard(&self.running);

        self.metrics.start_tick();
        let decision = self.tick().await;
        self.metrics.finish_tick();
        Some(decision)
    }

    /// Fresh parameters for the latest regime, risk and trade history, computed
    /// from the applied set.
    ///
    /// Nothing is stored; the caller applies the result explicitly.
    pub async fn optimize(&self) -> Result<AdaptiveParameters, EngineError> {
        let snapshot = self.state.snapshot().await;
        let regime = snapshot
            .regime
            .as_ref()
            .map(|r| r.regime)
            .unwrap_or(MarketRegime::Sideways);
        let risk = snapshot
            .risk_metrics
            .clone()
            .unwrap_or_else(RiskMetrics::neutral);
        let outcomes: Vec<TradeOutcome> = snapshot.trade_outcomes.iter().cloned().collect();
        self.adapter
            .adapt_with_history(regime, &risk, &snapshot.parameters, &outcomes)
    }

    /// Validate and apply parameters; on rejection the previous set stays in effect.
    pub async fn apply_parameters(
        &self,
        parameters: AdaptiveParameters,
    ) -> Result<Arc<BotSnapshot>, EngineError> {
        self.state.apply_parameters(parameters).await
    }

    async fn tick(&self) -> Decision {
        let snapshot = self.state.snapshot().await;

        let (candles, account) = tokio::join!(
            self.data_source.fetch(
                &self.symbol,
                self.timeframe,
                self.settings.candle_limit,
                self.settings.fetch_timeout,
            ),
            self.fetch_account(),
        );

        let evaluated = candles.and_then(|candles| {
            let indicators = self.bank.compute(&candles)?;
            Ok((candles, indicators))
        });

        match evaluated {
            Ok((candles, indicators)) => {
                self.decide(&snapshot, &candles, &indicators, account).await
            }
            Err(e) => self.degrade(e, account).await,
        }
    }

    async fn fetch_account(&self) -> Option<AccountState> {
        let account = self.account.as_ref()?;
        match tokio::time::timeout(
            self.settings.fetch_timeout,
            account.get_account_state(&self.bot_id),
        )
        .await
        {
            Ok(Ok(state)) => Some(state),
            Ok(Err(e)) => {
                warn!(bot_id = %self.bot_id, error = %e, "Account state unavailable");
                None
            }
            Err(_) => {
                warn!(bot_id = %self.bot_id, "Account state fetch timed out");
                None
            }
        }
    }

    async fn degrade(&self, error: EngineError, account: Option<AccountState>) -> Decision {
        warn!(
            bot_id = %self.bot_id,
            symbol = %self.symbol,
            error = %error,
            "Cannot evaluate, holding"
        );
        self.metrics.record_degraded();
        self.metrics.record_hold();

        let signal = Signal::insufficient_data();
        let mut outcome = TickOutcome::degraded(signal.clone());
        outcome.balance = account.map(|a| a.balance);
        self.state.commit(outcome).await;

        Decision::degraded(signal)
    }

    async fn decide(
        &self,
        snapshot: &BotSnapshot,
        candles: &[Candle],
        indicators: &IndicatorSet,
        account: Option<AccountState>,
    ) -> Decision {
        let price = indicators.close;
        let account = account.map(|a| self.mark_to_market(a, price));
        let equity = account.as_ref().map(|a| EquityPoint {
            timestamp: Utc::now(),
            equity: a.equity(),
        });

        let kill_switch = equity
            .as_ref()
            .map(|point| self.check_kill_switch(&snapshot.kill_switch, point));

        let mut equity_history: Vec<EquityPoint> =
            snapshot.equity_history.iter().cloned().collect();
        if let Some(point) = &equity {
            equity_history.push(point.clone());
        }
        let inputs = RiskInputs {
            candles,
            equity_history: &equity_history,
            account: account.as_ref(),
            spread_pct: None,
        };

        let (regime, synthesized, risk) = tokio::join!(
            async { self.detector.detect(indicators) },
            async { self.synthesizer.synthesize(indicators) },
            async { self.scorer.score(&inputs) },
        );

        let mut reasoning = synthesized.reasoning.clone();
        reasoning.push(format!("Market regime: {} ({})", regime.regime, regime.reasoning));

        let outcomes: Vec<TradeOutcome> = snapshot.trade_outcomes.iter().cloned().collect();
        let adapted = self.adapter.adapt_with_history(
            regime.regime,
            &risk,
            &snapshot.parameters,
            &outcomes,
        );
        let params = match adapted {
            Ok(params) => params,
            Err(e) => {
                warn!(bot_id = %self.bot_id, error = %e, "Parameter adaptation rejected");
                reasoning.push(format!(
                    "Parameter adaptation rejected ({e}); trading with applied parameters"
                ));
                snapshot.parameters.clone()
            }
        };
        reasoning.extend(params.adaptive_reasoning.iter().cloned());

        let mut action = gate(
            synthesized.action,
            synthesized.confidence,
            params.confidence_threshold,
            &mut reasoning,
        );
        if let Some(halt) = kill_switch.as_ref().filter(|k| k.halted) {
            if action == TradeAction::Buy {
                reasoning.push(format!(
                    "Trading halted by drawdown kill switch ({}); new entries blocked",
                    halt.reason.as_deref().unwrap_or("drawdown limit reached")
                ));
                action = TradeAction::Hold;
            }
        }
        if action != TradeAction::Hold && self.account.is_some() && account.is_none() {
            reasoning.push("Account state unavailable; holding".to_string());
            action = TradeAction::Hold;
        }

        let mut sizing = None;
        let mut order = None;
        let mut order_error = None;
        let mut trade = None;
        match (&account, action) {
            (_, TradeAction::Hold) => self.metrics.record_hold(),
            (Some(account), _) => {
                let (sized, receipt, error) =
                    self.execute(action, &params, price, account.balance).await;
                if let Some(e) = &error {
                    reasoning.push(format!("Order failed: {e}"));
                }
                trade = receipt
                    .as_ref()
                    .and_then(|r| closed_trade(r, regime.regime));
                sizing = Some(sized);
                order = receipt;
                order_error = error;
                self.metrics.record_trade();
            }
            (None, _) => {
                reasoning.push("No account attached; signal not sized".to_string());
                self.metrics.record_unsized_signal();
            }
        }

        let signal = Signal {
            action,
            confidence: synthesized.confidence,
            strength: synthesized.strength,
            risk_score: risk.overall_risk_score,
            reasoning,
            timestamp: Utc::now(),
        };

        info!(
            bot_id = %self.bot_id,
            symbol = %self.symbol,
            action = %signal.action,
            confidence = signal.confidence,
            threshold = params.confidence_threshold,
            regime = %regime.regime,
            risk = risk.overall_risk_score,
            "Decision"
        );

        self.state
            .commit(TickOutcome {
                signal: signal.clone(),
                regime: Some(regime.clone()),
                risk_metrics: Some(risk),
                effective_parameters: Some(params.clone()),
                sizing: sizing.clone(),
                order: order.clone(),
                balance: account.as_ref().map(|a| a.balance),
                equity,
                bar_returns: Some(bar_returns(candles)),
                trade,
                kill_switch,
            })
            .await;

        Decision {
            signal,
            regime: Some(regime.regime),
            parameters: Some(params),
            sizing,
            order,
            order_error,
        }
    }

    /// Size a buy/sell and, when an executor is attached, place it.
    async fn execute(
        &self,
        action: TradeAction,
        params: &AdaptiveParameters,
        price: f64,
        balance: f64,
    ) -> (PositionSizingResult, Option<OrderReceipt>, Option<EngineError>) {
        let sizing = self.sizer.size(balance, params, price);

        let (Some(executor), Some(side)) = (&self.executor, action.side()) else {
            return (sizing, None, None);
        };
        let Some(qty) = self.sizer.order_quantity(&sizing) else {
            debug!(bot_id = %self.bot_id, size = sizing.size, "Nothing to trade after rounding");
            return (sizing, None, None);
        };

        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side,
            qty,
            reference_price: price,
        };
        match executor.place_order(request).await {
            Ok(receipt) => (sizing, Some(receipt), None),
            Err(e) => {
                self.metrics.record_order_failure();
                warn!(
                    bot_id = %self.bot_id,
                    executor = executor.executor_name(),
                    error = %e,
                    "Order failed"
                );
                (sizing, None, Some(e))
            }
        }
    }

    /// Advance the drawdown kill switch and log any level it crossed.
    fn check_kill_switch(&self, previous: &KillSwitchState, point: &EquityPoint) -> KillSwitchState {
        let (next, event) = self.kill_switch.evaluate(previous, point.equity, point.timestamp);
        match event {
            Some(KillSwitchEvent::Activated) => error!(
                bot_id = %self.bot_id,
                drawdown = next.drawdown,
                peak_equity = next.peak_equity,
                reason = next.reason.as_deref().unwrap_or_default(),
                "Drawdown kill switch activated"
            ),
            Some(KillSwitchEvent::Critical) => warn!(
                bot_id = %self.bot_id,
                drawdown = next.drawdown,
                "Drawdown approaching kill switch limit"
            ),
            Some(KillSwitchEvent::Warning) => warn!(
                bot_id = %self.bot_id,
                drawdown = next.drawdown,
                "Drawdown warning"
            ),
            Some(KillSwitchEvent::Deactivated) => info!(
                bot_id = %self.bot_id,
                drawdown = next.drawdown,
                "Drawdown recovered, kill switch released"
            ),
            None => {}
        }
        next
    }

    /// Value positions in this bot's symbol at the latest close.
    fn mark_to_market(&self, mut account: AccountState, price: f64) -> AccountState {
        for position in account
            .open_positions
            .iter_mut()
            .filter(|p| p.symbol == self.symbol)
        {
            position.current_price = price;
        }
        account
    }
}

/// Demote a buy/sell whose confidence is under the threshold to a hold.
pub fn gate(
    action: TradeAction,
    confidence: f64,
    threshold: f64,
    reasoning: &mut Vec<String>,
) -> TradeAction {
    if action != TradeAction::Hold && confidence < threshold {
        reasoning.push(format!(
            "confidence {:.2} below threshold {:.2}",
            confidence, threshold
        ));
        return TradeAction::Hold;
    }
    action
}

/// Close-to-close return of every bar, stamped with the later bar's open time.
/// Bars following a non-positive close are skipped.
pub fn bar_returns(candles: &[Candle]) -> Vec<ReturnPoint> {
    candles
        .windows(2)
        .filter(|w| w[0].close > 0.0 && w[1].close.is_finite())
        .map(|w| ReturnPoint {
            timestamp: w[1].timestamp,
            value: w[1].close / w[0].close - 1.0,
        })
        .collect()
}

/// The realized result carried by a position-reducing fill.
fn closed_trade(receipt: &OrderReceipt, regime: MarketRegime) -> Option<TradeOutcome> {
    Some(TradeOutcome {
        symbol: receipt.symbol.clone(),
        regime,
        pnl: receipt.realized_pnl?,
        return_pct: receipt.realized_return_pct?,
        closed_at: receipt.filled_at,
    })
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod engine_tests;
