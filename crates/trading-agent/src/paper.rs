//! Paper-trading collaborators: a candle replay feed, an in-memory account
//! book and an executor that fills market orders at the decision price.

use analysis_core::{
    AccountSource, AccountState, Candle, CandleSource, EngineError, OpenPosition, OrderExecutor,
    OrderReceipt, OrderRequest, OrderSide, Timeframe,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Replays a recorded candle series, revealing one more bar per fetch.
///
/// The first fetch returns the first `limit` bars; every later fetch slides the
/// window forward by one until the series is exhausted, after which the last
/// window is served again.
#[derive(Debug)]
pub struct ReplayCandleSource {
    candles: Vec<Candle>,
    revealed: AtomicUsize,
}

impl ReplayCandleSource {
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        Self {
            candles,
            revealed: AtomicUsize::new(0),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_candles(path)?))
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    fn advance(&self, limit: usize) -> usize {
        let total = self.candles.len();
        let step = |revealed: usize| {
            if revealed == 0 {
                limit.min(total)
            } else {
                (revealed + 1).min(total)
            }
        };
        let previous = self
            .revealed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| Some(step(r)))
            .unwrap_or_else(|r| r);
        step(previous)
    }
}

/// Load a JSON array of candles
pub fn load_candles(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read candle file {}", path.display()))?;
    let candles: Vec<Candle> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse candle file {}", path.display()))?;
    info!(path = %path.display(), candles = candles.len(), "Loaded replay candles");
    Ok(candles)
}

#[async_trait]
impl CandleSource for ReplayCandleSource {
    async fn get_candles(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let end = self.advance(limit);
        let start = end.saturating_sub(limit);
        Ok(self.candles[start..end].to_vec())
    }
}

/// In-memory balances and positions, one book per bot.
#[derive(Debug)]
pub struct PaperAccount {
    initial_balance: f64,
    books: DashMap<String, AccountState>,
}

impl PaperAccount {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            initial_balance,
            books: DashMap::new(),
        }
    }

    pub fn state(&self, bot_id: &str) -> AccountState {
        self.books
            .entry(bot_id.to_string())
            .or_insert_with(|| AccountState {
                balance: self.initial_balance,
                open_positions: Vec::new(),
            })
            .clone()
    }

    /// Fill a market order at its reference price and update the bot's book.
    pub fn fill(&self, bot_id: &str, order: &OrderRequest) -> Result<OrderReceipt, EngineError> {
        let qty = order.qty.to_f64().unwrap_or(0.0);
        let price = order.reference_price;
        if !(qty > 0.0 && price > 0.0 && price.is_finite()) {
            return Err(EngineError::Execution(format!(
                "invalid paper order: qty {} at {}",
                order.qty, price
            )));
        }

        let mut book = self
            .books
            .entry(bot_id.to_string())
            .or_insert_with(|| AccountState {
                balance: self.initial_balance,
                open_positions: Vec::new(),
            });

        let mut realized = None;
        let filled_qty = match order.side {
            OrderSide::Buy => {
                let cost = qty * price;
                if cost > book.balance + 1e-9 {
                    return Err(EngineError::Execution(format!(
                        "insufficient balance: need {:.2}, have {:.2}",
                        cost, book.balance
                    )));
                }
                book.balance -= cost;
                let existing = book
                    .open_positions
                    .iter()
                    .position(|p| p.symbol == order.symbol);
                if let Some(idx) = existing {
                    let position = &mut book.open_positions[idx];
                    let total = position.quantity + qty;
                    position.entry_price =
                        (position.entry_price * position.quantity + price * qty) / total;
                    position.quantity = total;
                    position.current_price = price;
                } else {
                    book.open_positions.push(OpenPosition {
                        symbol: order.symbol.clone(),
                        quantity: qty,
                        entry_price: price,
                        current_price: price,
                    });
                }
                order.qty
            }
            OrderSide::Sell => {
                let idx = book
                    .open_positions
                    .iter()
                    .position(|p| p.symbol == order.symbol && p.quantity > 0.0)
                    .ok_or_else(|| {
                        EngineError::Execution(format!("no {} position to sell", order.symbol))
                    })?;
                let held = book.open_positions[idx].quantity;
                let entry = book.open_positions[idx].entry_price;
                let sold = qty.min(held);
                book.balance += sold * price;
                realized = Some(((price - entry) * sold, price / entry - 1.0));
                if held - sold <= 1e-12 {
                    book.open_positions.remove(idx);
                } else {
                    let position = &mut book.open_positions[idx];
                    position.quantity = held - sold;
                    position.current_price = price;
                }
                if sold < qty {
                    Decimal::from_f64(sold).unwrap_or(Decimal::ZERO)
                } else {
                    order.qty
                }
            }
        };

        Ok(OrderReceipt {
            order_id: uuid::Uuid::new_v4().to_string(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: filled_qty,
            fill_price: price,
            filled_at: Utc::now(),
            realized_pnl: realized.map(|(pnl, _)| pnl),
            realized_return_pct: realized.map(|(_, ret)| ret),
        })
    }
}

#[async_trait]
impl AccountSource for PaperAccount {
    async fn get_account_state(&self, bot_id: &str) -> Result<AccountState, EngineError> {
        Ok(self.state(bot_id))
    }
}

/// Fills one bot's orders against a shared [`PaperAccount`].
pub struct PaperExecutor {
    bot_id: String,
    account: Arc<PaperAccount>,
}

impl PaperExecutor {
    pub fn new(bot_id: impl Into<String>, account: Arc<PaperAccount>) -> Self {
        Self {
            bot_id: bot_id.into(),
            account,
        }
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderReceipt, EngineError> {
        let receipt = self.account.fill(&self.bot_id, &order)?;
        info!(
            bot_id = %self.bot_id,
            order_id = %receipt.order_id,
            symbol = %receipt.symbol,
            side = ?receipt.side,
            qty = %receipt.qty,
            price = receipt.fill_price,
            "Paper order filled"
        );
        Ok(receipt)
    }

    fn executor_name(&self) -> &str {
        "paper"
    }
}
