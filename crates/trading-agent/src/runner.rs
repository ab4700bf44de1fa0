use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::engine::DecisionEngine;

/// Drives one engine on a fixed interval.
pub struct BotRunner {
    engine: Arc<DecisionEngine>,
    interval: Duration,
}

/// Handle to a running bot loop
pub struct BotHandle {
    bot_id: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BotRunner {
    pub fn new(engine: Arc<DecisionEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Start the evaluation loop on the current runtime.
    ///
    /// Each tick runs in its own task so a slow tick never stalls the loop;
    /// while one is still in flight, the next is skipped and counted.
    pub fn spawn(self) -> BotHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let bot_id = self.engine.bot_id().to_string();
        let engine = self.engine;
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut in_flight: Option<JoinHandle<()>> = None;

            info!(
                bot_id = %engine.bot_id(),
                symbol = %engine.symbol(),
                interval_secs = interval.as_secs_f64(),
                "Bot loop started"
            );

            loop {
                tokio::select! {
                    biased;

                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if in_flight.as_ref().is_some_and(|tick| !tick.is_finished()) {
                            engine.metrics().record_skipped();
                            warn!(bot_id = %engine.bot_id(), "Previous tick still running, skipping");
                            continue;
                        }
                        let engine = engine.clone();
                        in_flight = Some(tokio::spawn(async move {
                            engine.try_tick().await;
                        }));
                    }
                }
            }

            // Let an in-flight tick commit before reporting stopped
            if let Some(tick) = in_flight {
                if let Err(e) = tick.await {
                    warn!(bot_id = %engine.bot_id(), error = %e, "Tick task failed");
                }
            }
            engine.metrics().log_metrics();
            info!(bot_id = %engine.bot_id(), "Bot loop stopped");
        });

        BotHandle {
            bot_id,
            stop_tx,
            task,
        }
    }
}

impl BotHandle {
    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    /// Cancel future ticks and wait for the loop (and any in-flight tick) to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(bot_id = %self.bot_id, error = %e, "Bot loop task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::DataSource;
    use crate::engine::EngineSettings;
    use analysis_core::{AdaptiveParameters, Timeframe};

    fn engine() -> Arc<DecisionEngine> {
        Arc::new(
            DecisionEngine::new(
                "bot-1",
                "BTC/USDT",
                Timeframe::Hour1,
                AdaptiveParameters::default(),
                DataSource::Unavailable("no feed".into()),
                EngineSettings::default(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_runs_until_stopped() {
        let engine = engine();
        let handle = BotRunner::new(engine.clone(), Duration::from_millis(20)).spawn();
        assert_eq!(handle.bot_id(), "bot-1");

        time::sleep(Duration::from_millis(150)).await;
        handle.stop().await;

        let ticks = engine.metrics().snapshot().ticks_run;
        assert!(ticks >= 2, "expected several ticks, got {ticks}");
        assert_eq!(engine.snapshot().await.signals.len() as u64, ticks);

        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(engine.metrics().snapshot().ticks_run, ticks);
    }

    #[tokio::test]
    async fn test_stop_before_first_tick_completes() {
        let engine = engine();
        let handle = BotRunner::new(engine.clone(), Duration::from_secs(3600)).spawn();
        handle.stop().await;
        // the immediate first tick either ran to completion or never started
        assert!(engine.metrics().snapshot().ticks_run <= 1);
        assert!(!engine.is_running());
    }
}
