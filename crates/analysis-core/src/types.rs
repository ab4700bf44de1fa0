use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::EngineError;

/// Lowest confidence threshold a bot may run with.
pub const MIN_CONFIDENCE_THRESHOLD: f64 = 0.5;
/// Highest confidence threshold a bot may run with.
pub const MAX_CONFIDENCE_THRESHOLD: f64 = 0.9;
/// Hard ceiling on capital risked per trade, as a fraction of balance.
pub const MAX_RISK_PER_TRADE: f64 = 0.02;

/// OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::Minute1 => 1,
            Timeframe::Minute5 => 5,
            Timeframe::Minute15 => 15,
            Timeframe::Hour1 => 60,
            Timeframe::Hour4 => 240,
            Timeframe::Day1 => 1440,
        }
    }

    /// Bars per year on a 24/7 market, used to annualize volatility.
    pub fn periods_per_year(&self) -> f64 {
        (365 * 1440) as f64 / self.to_minutes() as f64
    }

    /// Bars per calendar day
    pub fn periods_per_day(&self) -> f64 {
        1440.0 / self.to_minutes() as f64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
        }
    }
}

impl FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Timeframe::Minute1),
            "5m" => Ok(Timeframe::Minute5),
            "15m" => Ok(Timeframe::Minute15),
            "1h" => Ok(Timeframe::Hour1),
            "4h" => Ok(Timeframe::Hour4),
            "1d" => Ok(Timeframe::Day1),
            other => Err(EngineError::Configuration(format!("unknown timeframe '{}'", other))),
        }
    }
}

/// Technical indicator values for the most recent bar of a window.
///
/// Every field is optional: a value that could not be computed (e.g. a flat
/// window for Bollinger %B) is `None` and its vote is dropped downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub close: f64,
    pub ema_9: Option<f64>,
    pub ema_21: Option<f64>,
    pub ema_50: Option<f64>,
    pub rsi: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    /// Histogram one bar earlier, for crossover detection
    pub macd_prev_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub obv: Option<f64>,
    pub obv_sma: Option<f64>,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub volume: f64,
    pub volume_sma: Option<f64>,
}

impl IndicatorSet {
    /// ATR as a fraction of the last close.
    pub fn normalized_atr(&self) -> Option<f64> {
        match self.atr {
            Some(atr) if self.close > 0.0 => Some(atr / self.close),
            _ => None,
        }
    }

    /// Position of the close inside the Bollinger envelope (0 = lower band, 1 = upper band).
    pub fn bollinger_percent_b(&self) -> Option<f64> {
        let (upper, lower) = (self.bb_upper?, self.bb_lower?);
        let width = upper - lower;
        if width.abs() < f64::EPSILON {
            return None;
        }
        Some((self.close - lower) / width)
    }

    /// Last volume relative to its 20-bar average.
    pub fn volume_ratio(&self) -> Option<f64> {
        match self.volume_sma {
            Some(avg) if avg > 0.0 => Some(self.volume / avg),
            _ => None,
        }
    }
}

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
    Volatile,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 4] = [
        MarketRegime::Bull,
        MarketRegime::Bear,
        MarketRegime::Sideways,
        MarketRegime::Volatile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Bull => "bull",
            MarketRegime::Bear => "bear",
            MarketRegime::Sideways => "sideways",
            MarketRegime::Volatile => "volatile",
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::Hold => "hold",
        }
    }

    pub fn side(&self) -> Option<OrderSide> {
        match self {
            TradeAction::Buy => Some(OrderSide::Buy),
            TradeAction::Sell => Some(OrderSide::Sell),
            TradeAction::Hold => None,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final output of one evaluation tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: TradeAction,
    pub confidence: f64,
    pub strength: f64,
    pub risk_score: f64,
    pub reasoning: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub const INSUFFICIENT_DATA_REASON: &'static str = "insufficient historical data";

    /// The fail-safe decision emitted when the engine cannot evaluate.
    pub fn insufficient_data() -> Self {
        Self {
            action: TradeAction::Hold,
            confidence: 0.0,
            strength: 0.0,
            // unknown risk is reported mid-range, not as minimal
            risk_score: 0.5,
            reasoning: vec![Self::INSUFFICIENT_DATA_REASON.to_string()],
            timestamp: Utc::now(),
        }
    }
}

/// Risk snapshot for one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Annualized standard deviation of returns
    pub volatility: f64,
    pub sharpe_ratio: f64,
    /// Fraction of peak (0.2 = 20%)
    pub max_drawdown: f64,
    /// Historical 95% one-period VaR, as a positive loss fraction
    pub var95: f64,
    /// Historical 99% one-period VaR, as a positive loss fraction
    pub var99: f64,
    pub liquidity_risk: f64,
    pub concentration_risk: f64,
    pub diversification_ratio: f64,
    pub overall_risk_score: f64,
}

impl RiskMetrics {
    /// Mid-range metrics used before any history exists.
    pub fn neutral() -> Self {
        Self {
            volatility: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            var95: 0.0,
            var99: 0.0,
            liquidity_risk: 0.5,
            concentration_risk: 0.5,
            diversification_ratio: 0.5,
            overall_risk_score: 0.5,
        }
    }
}

/// Decision parameters a bot trades with. Replaced whole, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveParameters {
    pub confidence_threshold: f64,
    pub position_multiplier: f64,
    pub risk_per_trade: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_enabled: bool,
    #[serde(default)]
    pub adaptive_reasoning: Vec<String>,
}

impl Default for AdaptiveParameters {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.65,
            position_multiplier: 1.0,
            risk_per_trade: 0.02,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.05,
            trailing_stop_enabled: false,
            adaptive_reasoning: Vec::new(),
        }
    }
}

impl AdaptiveParameters {
    /// Reject parameters outside the domain bounds.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(MIN_CONFIDENCE_THRESHOLD..=MAX_CONFIDENCE_THRESHOLD).contains(&self.confidence_threshold) {
            return Err(EngineError::Configuration(format!(
                "confidence_threshold {:.3} outside [{}, {}]",
                self.confidence_threshold, MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD
            )));
        }
        if !(self.position_multiplier > 0.0 && self.position_multiplier.is_finite()) {
            return Err(EngineError::Configuration(format!(
                "position_multiplier {} must be positive",
                self.position_multiplier
            )));
        }
        if !(self.risk_per_trade > 0.0 && self.risk_per_trade <= MAX_RISK_PER_TRADE) {
            return Err(EngineError::Configuration(format!(
                "risk_per_trade {} outside (0, {}]",
                self.risk_per_trade, MAX_RISK_PER_TRADE
            )));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 0.5) {
            return Err(EngineError::Configuration(format!(
                "stop_loss_pct {} outside (0, 0.5)",
                self.stop_loss_pct
            )));
        }
        if !(self.take_profit_pct > 0.0 && self.take_profit_pct < 0.5) {
            return Err(EngineError::Configuration(format!(
                "take_profit_pct {} outside (0, 0.5)",
                self.take_profit_pct
            )));
        }
        Ok(())
    }
}

/// Concrete order size for a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizingResult {
    /// Quantity in base-asset units
    pub size: f64,
    pub risk_amount: f64,
    /// Size was clamped to what the balance can afford
    pub capped: bool,
}

/// Open position held by a bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
}

impl OpenPosition {
    pub fn market_value(&self) -> f64 {
        self.quantity.abs() * self.current_price
    }
}

/// Account state as reported by the account collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// Free cash balance
    pub balance: f64,
    pub open_positions: Vec<OpenPosition>,
}

impl AccountState {
    pub fn positions_value(&self) -> f64 {
        self.open_positions.iter().map(|p| p.market_value()).sum()
    }

    pub fn equity(&self) -> f64 {
        self.balance + self.positions_value()
    }
}

/// Close-to-close return of one bar, stamped with the bar's close time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A position reduction with its realized result, tagged with the regime it closed in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub regime: MarketRegime,
    pub pnl: f64,
    /// Exit price over average entry, minus one
    pub return_pct: f64,
    pub closed_at: DateTime<Utc>,
}

impl TradeOutcome {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

/// One point of a bot's equity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    /// Last observed price when the order was decided
    pub reference_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub fill_price: f64,
    pub filled_at: DateTime<Utc>,
    /// Set when the fill reduced a position
    #[serde(default)]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub realized_return_pct: Option<f64>,
}
