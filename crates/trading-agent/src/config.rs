use analysis_core::{AdaptiveParameters, Timeframe};
use anyhow::{bail, Context, Result};
use risk_manager::KillSwitchConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::time::Duration;
use technical_analysis::MIN_CANDLES;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Bots
    pub bot_ids: Vec<String>,              // one evaluation task per id
    pub symbol: String,                    // BTC/USDT
    pub timeframe: Timeframe,              // 1h

    // Evaluation loop
    pub candle_limit: usize,               // 200
    pub eval_interval_seconds: u64,        // 60
    pub fetch_timeout_seconds: u64,        // 10
    pub signal_history_len: usize,         // 50

    // Base trading parameters
    pub base_parameters: AdaptiveParameters,
    pub use_regime_presets: bool,          // start adaptation from the regime table
    pub regime_volatility_ceiling: f64,    // 0.03 (ATR / close)
    pub performance_min_trades: usize,     // 5 closed trades per regime, 0 = off

    // Drawdown kill switch
    pub kill_switch: KillSwitchConfig,

    // Paper trading
    pub paper_trading: bool,               // false = decisions only, no orders
    pub initial_balance: f64,              // 10000
    pub candle_file: Option<String>,       // JSON replay file

    // Telemetry
    pub metrics_log_interval_ticks: u64,   // 10

    // HTTP
    pub api_bind_addr: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let base_parameters = AdaptiveParameters {
            confidence_threshold: var("BASE_CONFIDENCE_THRESHOLD", "0.65")
                .parse()
                .context("BASE_CONFIDENCE_THRESHOLD must be a number")?,
            risk_per_trade: var("BASE_RISK_PER_TRADE", "0.02")
                .parse()
                .context("BASE_RISK_PER_TRADE must be a number")?,
            stop_loss_pct: var("BASE_STOP_LOSS_PCT", "0.02")
                .parse()
                .context("BASE_STOP_LOSS_PCT must be a number")?,
            take_profit_pct: var("BASE_TAKE_PROFIT_PCT", "0.05")
                .parse()
                .context("BASE_TAKE_PROFIT_PCT must be a number")?,
            trailing_stop_enabled: var("TRAILING_STOP_ENABLED", "false")
                .parse()
                .context("TRAILING_STOP_ENABLED must be true or false")?,
            ..AdaptiveParameters::default()
        };

        let kill_switch = KillSwitchConfig {
            enabled: var("KILL_SWITCH_ENABLED", "true")
                .parse()
                .context("KILL_SWITCH_ENABLED must be true or false")?,
            warning_drawdown: var("KILL_SWITCH_WARNING_DRAWDOWN", "0.10")
                .parse()
                .context("KILL_SWITCH_WARNING_DRAWDOWN must be a number")?,
            critical_drawdown: var("KILL_SWITCH_CRITICAL_DRAWDOWN", "0.12")
                .parse()
                .context("KILL_SWITCH_CRITICAL_DRAWDOWN must be a number")?,
            max_drawdown: var("KILL_SWITCH_MAX_DRAWDOWN", "0.15")
                .parse()
                .context("KILL_SWITCH_MAX_DRAWDOWN must be a number")?,
            recovery_drawdown: var("KILL_SWITCH_RECOVERY_DRAWDOWN", "0.05")
                .parse()
                .context("KILL_SWITCH_RECOVERY_DRAWDOWN must be a number")?,
            auto_recovery: var("KILL_SWITCH_AUTO_RECOVERY", "true")
                .parse()
                .context("KILL_SWITCH_AUTO_RECOVERY must be true or false")?,
        };

        let config = Self {
            bot_ids: var("BOT_IDS", "bot-1")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            symbol: var("BOT_SYMBOL", "BTC/USDT"),
            timeframe: var("TIMEFRAME", "1h").parse()?,

            candle_limit: var("CANDLE_LIMIT", "200")
                .parse()
                .context("CANDLE_LIMIT must be an integer")?,
            eval_interval_seconds: var("EVAL_INTERVAL_SECONDS", "60")
                .parse()
                .context("EVAL_INTERVAL_SECONDS must be an integer")?,
            fetch_timeout_seconds: var("FETCH_TIMEOUT_SECONDS", "10")
                .parse()
                .context("FETCH_TIMEOUT_SECONDS must be an integer")?,
            signal_history_len: var("SIGNAL_HISTORY_LEN", "50")
                .parse()
                .context("SIGNAL_HISTORY_LEN must be an integer")?,

            base_parameters,
            use_regime_presets: var("USE_REGIME_PRESETS", "false")
                .parse()
                .context("USE_REGIME_PRESETS must be true or false")?,
            regime_volatility_ceiling: var("REGIME_VOLATILITY_CEILING", "0.03")
                .parse()
                .context("REGIME_VOLATILITY_CEILING must be a number")?,
            performance_min_trades: var("PERFORMANCE_MIN_TRADES", "5")
                .parse()
                .context("PERFORMANCE_MIN_TRADES must be an integer")?,

            kill_switch,

            paper_trading: var("PAPER_TRADING", "true")
                .parse()
                .context("PAPER_TRADING must be true or false")?,
            initial_balance: var("INITIAL_BALANCE", "10000")
                .parse()
                .context("INITIAL_BALANCE must be a number")?,
            candle_file: lookup("CANDLE_FILE").filter(|s| !s.trim().is_empty()),

            metrics_log_interval_ticks: var("METRICS_LOG_INTERVAL_TICKS", "10")
                .parse()
                .context("METRICS_LOG_INTERVAL_TICKS must be an integer")?,

            api_bind_addr: var("API_BIND_ADDR", "0.0.0.0:3000"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot_ids.is_empty() {
            bail!("BOT_IDS must name at least one bot");
        }
        let unique: HashSet<&String> = self.bot_ids.iter().collect();
        if unique.len() != self.bot_ids.len() {
            bail!("BOT_IDS contains duplicates");
        }
        if self.symbol.trim().is_empty() {
            bail!("BOT_SYMBOL must not be empty");
        }
        if self.candle_limit < MIN_CANDLES {
            bail!(
                "CANDLE_LIMIT must be at least {} (got {})",
                MIN_CANDLES,
                self.candle_limit
            );
        }
        if self.eval_interval_seconds == 0 {
            bail!("EVAL_INTERVAL_SECONDS must be positive");
        }
        if self.fetch_timeout_seconds == 0 {
            bail!("FETCH_TIMEOUT_SECONDS must be positive");
        }
        if self.signal_history_len == 0 {
            bail!("SIGNAL_HISTORY_LEN must be positive");
        }
        if !(self.initial_balance > 0.0 && self.initial_balance.is_finite()) {
            bail!("INITIAL_BALANCE must be positive");
        }
        if !(self.regime_volatility_ceiling > 0.0 && self.regime_volatility_ceiling.is_finite()) {
            bail!("REGIME_VOLATILITY_CEILING must be positive");
        }
        self.base_parameters
            .validate()
            .context("invalid base trading parameters")?;
        self.kill_switch
            .validate()
            .context("invalid KILL_SWITCH_* drawdown thresholds")?;
        Ok(())
    }

    pub fn eval_interval(&self) -> Duration {
        Duration::from_secs(self.eval_interval_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AgentConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bot_ids, vec!["bot-1".to_string()]);
        assert_eq!(config.symbol, "BTC/USDT");
        assert_eq!(config.timeframe, Timeframe::Hour1);
        assert_eq!(config.candle_limit, 200);
        assert_eq!(config.eval_interval(), Duration::from_secs(60));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.signal_history_len, 50);
        assert_eq!(config.base_parameters, AdaptiveParameters::default());
        assert!(config.paper_trading);
        assert!(!config.use_regime_presets);
        assert!(config.candle_file.is_none());
        assert_eq!(config.api_bind_addr, "0.0.0.0:3000");
        assert_eq!(config.performance_min_trades, 5);
        assert_eq!(config.kill_switch, KillSwitchConfig::default());
    }

    #[test]
    fn test_kill_switch_settings() {
        let config = load(&[
            ("KILL_SWITCH_MAX_DRAWDOWN", "0.25"),
            ("KILL_SWITCH_AUTO_RECOVERY", "false"),
            ("PERFORMANCE_MIN_TRADES", "0"),
        ])
        .unwrap();
        assert_eq!(config.kill_switch.max_drawdown, 0.25);
        assert!(!config.kill_switch.auto_recovery);
        assert!(config.kill_switch.enabled);
        assert_eq!(config.performance_min_trades, 0);

        // recovery must sit below the warning level
        let err = load(&[("KILL_SWITCH_RECOVERY_DRAWDOWN", "0.11")]).unwrap_err();
        assert!(format!("{err:#}").contains("KILL_SWITCH"));
        assert!(load(&[("KILL_SWITCH_MAX_DRAWDOWN", "1.5")]).is_err());
        assert!(load(&[("KILL_SWITCH_ENABLED", "maybe")]).is_err());
    }

    #[test]
    fn test_bot_list_parsing() {
        let config = load(&[("BOT_IDS", " alpha, beta ,,gamma"), ("TIMEFRAME", "15m")]).unwrap();
        assert_eq!(config.bot_ids, vec!["alpha", "beta", "gamma"]);
        assert_eq!(config.timeframe, Timeframe::Minute15);
    }

    #[test]
    fn test_rejects_out_of_domain_base_parameters() {
        let err = load(&[("BASE_CONFIDENCE_THRESHOLD", "0.95")]).unwrap_err();
        assert!(format!("{err:#}").contains("confidence_threshold"));

        assert!(load(&[("BASE_RISK_PER_TRADE", "0.05")]).is_err());
        assert!(load(&[("BASE_STOP_LOSS_PCT", "0")]).is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(load(&[("CANDLE_LIMIT", "50")]).is_err());
        assert!(load(&[("CANDLE_LIMIT", "lots")]).is_err());
        assert!(load(&[("BOT_IDS", "a,a")]).is_err());
        assert!(load(&[("BOT_IDS", " , ")]).is_err());
        assert!(load(&[("TIMEFRAME", "2h")]).is_err());
        assert!(load(&[("EVAL_INTERVAL_SECONDS", "0")]).is_err());
        assert!(load(&[("INITIAL_BALANCE", "-1")]).is_err());
    }

    #[test]
    fn test_empty_candle_file_is_none() {
        let config = load(&[("CANDLE_FILE", "  ")]).unwrap();
        assert!(config.candle_file.is_none());
        let config = load(&[("CANDLE_FILE", "data/btc.json")]).unwrap();
        assert_eq!(config.candle_file.as_deref(), Some("data/btc.json"));
    }
}
