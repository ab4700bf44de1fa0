use analysis_core::{AdaptiveParameters, PositionSizingResult, MAX_RISK_PER_TRADE};
use anyhow::{bail, Result};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stop-distance position sizer
///
/// The capital at risk on a trade is the smallest of:
///   balance * risk_per_trade * position_multiplier
///   balance * risk_per_trade
///   balance * hard_risk_ceiling
/// and the quantity is chosen so that hitting the stop loses exactly that amount.
/// A position the balance cannot pay for is cut down to what it can.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSizer {
    /// Absolute cap on capital at risk per trade, as a fraction of balance
    pub hard_risk_ceiling: f64,

    /// Decimal places kept when converting a size into an order quantity
    pub quantity_scale: u32,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self {
            hard_risk_ceiling: MAX_RISK_PER_TRADE,
            quantity_scale: 8,
        }
    }
}

impl PositionSizer {
    pub fn new(hard_risk_ceiling: f64, quantity_scale: u32) -> Result<Self> {
        if !(hard_risk_ceiling > 0.0 && hard_risk_ceiling <= MAX_RISK_PER_TRADE) {
            bail!(
                "hard_risk_ceiling must be in (0, {}], got {}",
                MAX_RISK_PER_TRADE,
                hard_risk_ceiling
            );
        }
        if quantity_scale > 18 {
            bail!("quantity_scale must be at most 18");
        }

        Ok(Self {
            hard_risk_ceiling,
            quantity_scale,
        })
    }

    /// Conservative sizer risking at most 1% per trade
    pub fn conservative() -> Self {
        Self {
            hard_risk_ceiling: 0.01,
            quantity_scale: 8,
        }
    }

    pub fn size(&self, balance: f64, params: &AdaptiveParameters, price: f64) -> PositionSizingResult {
        let inputs_valid = [
            balance,
            price,
            params.risk_per_trade,
            params.position_multiplier,
            params.stop_loss_pct,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0);

        if !inputs_valid {
            return PositionSizingResult {
                size: 0.0,
                risk_amount: 0.0,
                capped: false,
            };
        }

        let base_risk = balance * params.risk_per_trade;
        let risk_amount = (base_risk * params.position_multiplier)
            .min(base_risk)
            .min(balance * self.hard_risk_ceiling);

        let mut size = risk_amount / (price * params.stop_loss_pct);
        let mut capped = false;
        if size * price > balance {
            size = balance / price;
            capped = true;
        }

        debug!(
            balance,
            price,
            risk_amount,
            size,
            capped,
            "Sized position"
        );

        PositionSizingResult {
            size,
            risk_amount,
            capped,
        }
    }

    /// Order quantity rounded down to `quantity_scale` places; `None` when nothing is left to trade.
    pub fn order_quantity(&self, result: &PositionSizingResult) -> Option<Decimal> {
        let qty = Decimal::from_f64(result.size)?
            .round_dp_with_strategy(self.quantity_scale, RoundingStrategy::ToZero);
        if qty > Decimal::ZERO {
            Some(qty)
        } else {
            None
        }
    }
}
