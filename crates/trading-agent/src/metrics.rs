use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Per-bot engine counters, shared between the evaluation task and the API.
#[derive(Debug)]
pub struct EngineMetrics {
    bot_id: String,
    ticks_run: AtomicU64,
    ticks_skipped: AtomicU64,
    holds: AtomicU64,
    trades: AtomicU64,
    unsized_signals: AtomicU64,
    degraded_ticks: AtomicU64,
    order_failures: AtomicU64,
    last_tick_ms: AtomicU64,
    started: Mutex<Option<Instant>>,
    log_interval_ticks: u64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetricsSnapshot {
    pub ticks_run: u64,
    pub ticks_skipped: u64,
    pub holds: u64,
    pub trades: u64,
    /// Buy/sell decisions published without an account to size against
    pub unsized_signals: u64,
    pub degraded_ticks: u64,
    pub order_failures: u64,
    pub last_tick_ms: u64,
}

impl EngineMetrics {
    pub fn new(bot_id: impl Into<String>, log_interval_ticks: u64) -> Self {
        Self {
            bot_id: bot_id.into(),
            ticks_run: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            holds: AtomicU64::new(0),
            trades: AtomicU64::new(0),
            unsized_signals: AtomicU64::new(0),
            degraded_ticks: AtomicU64::new(0),
            order_failures: AtomicU64::new(0),
            last_tick_ms: AtomicU64::new(0),
            started: Mutex::new(None),
            log_interval_ticks,
        }
    }

    pub fn start_tick(&self) {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
    }

    pub fn record_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hold(&self) {
        self.holds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trade(&self) {
        self.trades.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsized_signal(&self) {
        self.unsized_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded(&self) {
        self.degraded_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_order_failure(&self) {
        self.order_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish_tick(&self) {
        let elapsed = self
            .started
            .lock()
            .ok()
            .and_then(|mut started| started.take())
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.last_tick_ms.store(elapsed, Ordering::Relaxed);

        let ticks = self.ticks_run.fetch_add(1, Ordering::Relaxed) + 1;

        // Emit structured metrics periodically
        if self.log_interval_ticks > 0 && ticks % self.log_interval_ticks == 0 {
            self.log_metrics();
        }
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            holds: self.holds.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
            unsized_signals: self.unsized_signals.load(Ordering::Relaxed),
            degraded_ticks: self.degraded_ticks.load(Ordering::Relaxed),
            order_failures: self.order_failures.load(Ordering::Relaxed),
            last_tick_ms: self.last_tick_ms.load(Ordering::Relaxed),
        }
    }

    /// Emit structured telemetry via tracing
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        tracing::info!(
            bot_id = %self.bot_id,
            ticks = s.ticks_run,
            ticks_skipped = s.ticks_skipped,
            holds = s.holds,
            trades = s.trades,
            unsized_signals = s.unsized_signals,
            degraded_ticks = s.degraded_ticks,
            order_failures = s.order_failures,
            last_tick_ms = s.last_tick_ms,
            "Engine metrics summary"
        );
    }
}
