pub mod assessment;
pub mod kill_switch;
pub mod scorer;
pub mod var;
#[cfg(test)]
mod tests;

pub use assessment::{recommendations, RiskAssessment, RiskLevel};
pub use kill_switch::{DrawdownKillSwitch, KillSwitchConfig, KillSwitchEvent, KillSwitchState};
pub use scorer::{RiskInputs, RiskScorer, RiskSubScores, RiskWeights};
pub use var::{
    combine_returns, historical_expected_shortfall, historical_var, EsPoint, HorizonRiskReport,
    MultiHorizonRiskAggregator, PortfolioSleeve, RiskHorizon, VarPoint,
};
