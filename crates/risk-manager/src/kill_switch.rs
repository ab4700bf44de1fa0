//! Drawdown kill switch.
//!
//! Tracks peak equity and halts new entries once equity falls too far from it.
//! The switch itself is stateless: the caller keeps the [`KillSwitchState`] and
//! feeds it back on the next evaluation.

use analysis_core::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    pub enabled: bool,
    /// Drawdown from peak that logs a warning (0.10 = 10%)
    pub warning_drawdown: f64,
    pub critical_drawdown: f64,
    /// Drawdown from peak that halts trading
    pub max_drawdown: f64,
    /// Drawdown the account must recover to before trading resumes
    pub recovery_drawdown: f64,
    pub auto_recovery: bool,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_drawdown: 0.10,
            critical_drawdown: 0.12,
            max_drawdown: 0.15,
            recovery_drawdown: 0.05,
            auto_recovery: true,
        }
    }
}

impl KillSwitchConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let ordered = 0.0 <= self.recovery_drawdown
            && self.recovery_drawdown < self.warning_drawdown
            && self.warning_drawdown <= self.critical_drawdown
            && self.critical_drawdown <= self.max_drawdown
            && self.max_drawdown < 1.0;
        if !ordered {
            return Err(EngineError::Configuration(format!(
                "kill switch thresholds must satisfy 0 <= recovery ({}) < warning ({}) <= critical ({}) <= max ({}) < 1",
                self.recovery_drawdown, self.warning_drawdown, self.critical_drawdown, self.max_drawdown
            )));
        }
        Ok(())
    }
}

/// What the switch knows about one account
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub halted: bool,
    pub peak_equity: f64,
    pub current_equity: f64,
    /// Current decline from peak, as a fraction
    pub drawdown: f64,
    /// Worst decline seen so far
    pub max_drawdown: f64,
    pub reason: Option<String>,
    pub halted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSwitchEvent {
    Warning,
    Critical,
    Activated,
    Deactivated,
}

#[derive(Debug, Clone, Default)]
pub struct DrawdownKillSwitch {
    config: KillSwitchConfig,
}

impl DrawdownKillSwitch {
    pub fn new(config: KillSwitchConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &KillSwitchConfig {
        &self.config
    }

    /// Next state after observing `equity`, and the event that fired, if any.
    pub fn evaluate(
        &self,
        previous: &KillSwitchState,
        equity: f64,
        now: DateTime<Utc>,
    ) -> (KillSwitchState, Option<KillSwitchEvent>) {
        if !(equity.is_finite() && equity > 0.0) {
            return (previous.clone(), None);
        }

        let peak = previous.peak_equity.max(equity);
        let drawdown = (peak - equity) / peak;
        let mut next = KillSwitchState {
            peak_equity: peak,
            current_equity: equity,
            drawdown,
            max_drawdown: previous.max_drawdown.max(drawdown),
            ..previous.clone()
        };

        if !self.config.enabled {
            next.halted = false;
            next.reason = None;
            next.halted_at = None;
            return (next, None);
        }

        let cfg = &self.config;
        let event = if previous.halted {
            if cfg.auto_recovery && drawdown <= cfg.recovery_drawdown {
                next.halted = false;
                next.reason = None;
                next.halted_at = None;
                Some(KillSwitchEvent::Deactivated)
            } else {
                None
            }
        } else if drawdown >= cfg.max_drawdown {
            next.halted = true;
            next.reason = Some(format!(
                "drawdown {:.1}% from peak reached the {:.1}% limit",
                drawdown * 100.0,
                cfg.max_drawdown * 100.0
            ));
            next.halted_at = Some(now);
            Some(KillSwitchEvent::Activated)
        } else if drawdown >= cfg.critical_drawdown {
            Some(KillSwitchEvent::Critical)
        } else if drawdown >= cfg.warning_drawdown {
            Some(KillSwitchEvent::Warning)
        } else {
            None
        };

        debug!(equity, peak, drawdown, halted = next.halted, ?event, "Checked drawdown");
        (next, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn run(switch: &DrawdownKillSwitch, equities: &[f64]) -> (KillSwitchState, Vec<Option<KillSwitchEvent>>) {
        let mut state = KillSwitchState::default();
        let mut events = Vec::new();
        for &equity in equities {
            let (next, event) = switch.evaluate(&state, equity, Utc::now());
            state = next;
            events.push(event);
        }
        (state, events)
    }

    #[test]
    fn test_tracks_peak_and_drawdown() {
        let (state, events) = run(&DrawdownKillSwitch::default(), &[10_000.0, 11_000.0, 10_450.0]);
        assert_relative_eq!(state.peak_equity, 11_000.0);
        assert_relative_eq!(state.drawdown, 0.05, epsilon = 1e-12);
        assert!(!state.halted);
        assert!(events.iter().all(|e| e.is_none()));
    }

    #[test]
    fn test_escalates_then_halts() {
        let (state, events) = run(
            &DrawdownKillSwitch::default(),
            &[10_000.0, 8_950.0, 8_750.0, 8_400.0],
        );
        assert_eq!(
            events,
            vec![
                None,
                Some(KillSwitchEvent::Warning),
                Some(KillSwitchEvent::Critical),
                Some(KillSwitchEvent::Activated),
            ]
        );
        assert!(state.halted);
        assert!(state.halted_at.is_some());
        assert!(state.reason.as_deref().unwrap().contains("16.0%"));
    }

    #[test]
    fn test_stays_halted_until_recovery() {
        let switch = DrawdownKillSwitch::default();
        let (state, events) = run(&switch, &[10_000.0, 8_000.0, 9_000.0, 9_400.0]);
        // 10% below peak is not yet recovered
        assert!(state.halted);
        assert_eq!(events[2], None);
        assert_eq!(events[3], None);

        let (state, event) = switch.evaluate(&state, 9_600.0, Utc::now());
        assert_eq!(event, Some(KillSwitchEvent::Deactivated));
        assert!(!state.halted);
        assert!(state.reason.is_none());
        assert_relative_eq!(state.max_drawdown, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_without_auto_recovery_stays_halted() {
        let switch = DrawdownKillSwitch::new(KillSwitchConfig {
            auto_recovery: false,
            ..KillSwitchConfig::default()
        })
        .unwrap();
        let (state, _) = run(&switch, &[10_000.0, 8_000.0, 10_500.0]);
        assert!(state.halted);
        assert_eq!(state.drawdown, 0.0);
    }

    #[test]
    fn test_disabled_never_halts() {
        let switch = DrawdownKillSwitch::new(KillSwitchConfig {
            enabled: false,
            ..KillSwitchConfig::default()
        })
        .unwrap();
        let (state, events) = run(&switch, &[10_000.0, 5_000.0]);
        assert!(!state.halted);
        assert_relative_eq!(state.drawdown, 0.5);
        assert!(events.iter().all(|e| e.is_none()));
    }

    #[test]
    fn test_ignores_unusable_equity() {
        let switch = DrawdownKillSwitch::default();
        let (state, _) = run(&switch, &[10_000.0]);
        for bad in [0.0, -5.0, f64::NAN] {
            let (next, event) = switch.evaluate(&state, bad, Utc::now());
            assert_eq!(next, state);
            assert!(event.is_none());
        }
    }

    #[test]
    fn test_rejects_misordered_thresholds() {
        let config = KillSwitchConfig {
            recovery_drawdown: 0.2,
            ..KillSwitchConfig::default()
        };
        assert!(matches!(
            DrawdownKillSwitch::new(config),
            Err(EngineError::Configuration(_))
        ));
    }
}
