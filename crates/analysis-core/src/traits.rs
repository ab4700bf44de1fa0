use async_trait::async_trait;
use crate::{AccountState, Candle, EngineError, OrderReceipt, OrderRequest, Timeframe};

/// Source of ordered OHLCV candles (oldest first)
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError>;
}

/// Source of a bot's balance and open positions
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn get_account_state(&self, bot_id: &str) -> Result<AccountState, EngineError>;
}

/// Order execution, only invoked for buy/sell decisions
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderReceipt, EngineError>;

    /// Executor name for logging
    fn executor_name(&self) -> &str;
}
