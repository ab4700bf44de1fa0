use analysis_core::{Candle, CandleSource, EngineError, Timeframe};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where a bot's candles come from.
///
/// `Unavailable` is the explicit no-feed state; fetching from it behaves
/// exactly like a feed that returned too little history.
#[derive(Clone)]
pub enum DataSource {
    Live(Arc<dyn CandleSource>),
    Unavailable(String),
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Live(_) => f.write_str("DataSource::Live"),
            DataSource::Unavailable(reason) => write!(f, "DataSource::Unavailable({reason})"),
        }
    }
}

impl DataSource {
    pub fn is_live(&self) -> bool {
        matches!(self, DataSource::Live(_))
    }

    /// Fetch up to `limit` candles, oldest first. A fetch slower than `timeout` is `StaleData`.
    pub async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Candle>, EngineError> {
        let source = match self {
            DataSource::Live(source) => source,
            DataSource::Unavailable(reason) => {
                return Err(EngineError::InsufficientData(format!(
                    "data source unavailable: {reason}"
                )))
            }
        };

        let candles = tokio::time::timeout(timeout, source.get_candles(symbol, timeframe, limit))
            .await
            .map_err(|_| {
                EngineError::StaleData(format!(
                    "candle fetch for {symbol} exceeded {}ms",
                    timeout.as_millis()
                ))
            })??;

        if candles
            .windows(2)
            .any(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return Err(EngineError::StaleData(format!(
                "candles for {symbol} are out of order"
            )));
        }

        debug!(symbol, count = candles.len(), "Fetched candles");
        Ok(candles)
    }
}
