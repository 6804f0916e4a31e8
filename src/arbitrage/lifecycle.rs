//! Route decision lifecycle.

use serde::Serialize;
use strum::Display;
use tracing::trace;

use super::executor::RollbackOutcome;
use super::route::Route;
use crate::error::ArbitrageError;

/// Stage of a route between detection and execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RouteState {
    Detected,
    LiquidityChecked,
    RiskScored,
    Accepted,
    Rejected,
    Executing,
    Succeeded,
    Failed,
    RolledBack,
}

impl RouteState {
    /// Whether `next` may follow this state.
    pub fn can_transition_to(self, next: RouteState) -> bool {
        use RouteState::*;
        matches!(
            (self, next),
            (Detected, LiquidityChecked)
                | (LiquidityChecked, RiskScored)
                | (RiskScored, Accepted)
                | (RiskScored, Rejected)
                | (Accepted, Executing)
                | (Executing, Succeeded)
                | (Executing, Failed)
                | (Failed, RolledBack)
        )
    }

    /// No further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RouteState::Succeeded | RouteState::RolledBack | RouteState::Rejected
        )
    }
}

/// Tracks one route through its states.
///
/// A failed execution ends in `RolledBack` once nothing is left to undo. When
/// the margin repay fails the route stops at `Failed` with its loan open, and
/// no further transition is accepted.
#[derive(Debug, Clone)]
pub struct RouteLifecycle {
    route: Route,
    state: RouteState,
    history: Vec<RouteState>,
    loan_open: bool,
}

impl RouteLifecycle {
    /// Start tracking a freshly detected route.
    pub fn new(route: Route) -> Self {
        Self {
            route,
            state: RouteState::Detected,
            history: vec![RouteState::Detected],
            loan_open: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> RouteState {
        self.state
    }

    /// States visited, oldest first.
    pub fn history(&self) -> &[RouteState] {
        &self.history
    }

    /// Borrowed principal could not be repaid.
    pub fn loan_open(&self) -> bool {
        self.loan_open
    }

    /// Whether the route reached its final state.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal() || self.loan_open
    }

    /// Move to `next`, failing on transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: RouteState) -> Result<(), ArbitrageError> {
        if self.loan_open || !self.state.can_transition_to(next) {
            return Err(ArbitrageError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        trace!(route = %self.route, from = %self.state, to = %next, "Route state change");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Record an execution outcome from `Executing`.
    pub fn finish(&mut self, success: bool, rollback: &RollbackOutcome) -> Result<(), ArbitrageError> {
        if success {
            return self.advance(RouteState::Succeeded);
        }
        self.advance(RouteState::Failed)?;
        match rollback {
            RollbackOutcome::NotNeeded | RollbackOutcome::Repaid { .. } => {
                self.advance(RouteState::RolledBack)
            }
            RollbackOutcome::Failed { .. } => {
                self.loan_open = true;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lifecycle() -> RouteLifecycle {
        RouteLifecycle::new(Route::cycle("USDT", &["BTC", "ETH"]).unwrap())
    }

    #[test]
    fn happy_path_to_success() {
        let mut lc = lifecycle();
        for next in [
            RouteState::LiquidityChecked,
            RouteState::RiskScored,
            RouteState::Accepted,
            RouteState::Executing,
            RouteState::Succeeded,
        ] {
            lc.advance(next).unwrap();
        }
        assert!(lc.state().is_terminal());
        assert_eq!(lc.history().len(), 6);
    }

    #[test]
    fn failure_path_rolls_back() {
        let mut lc = lifecycle();
        lc.advance(RouteState::LiquidityChecked).unwrap();
        lc.advance(RouteState::RiskScored).unwrap();
        lc.advance(RouteState::Accepted).unwrap();
        lc.advance(RouteState::Executing).unwrap();
        lc.advance(RouteState::Failed).unwrap();
        assert!(!lc.state().is_terminal());
        lc.advance(RouteState::RolledBack).unwrap();
        assert!(lc.state().is_terminal());
    }

    fn executing() -> RouteLifecycle {
        let mut lc = lifecycle();
        for next in [
            RouteState::LiquidityChecked,
            RouteState::RiskScored,
            RouteState::Accepted,
            RouteState::Executing,
        ] {
            lc.advance(next).unwrap();
        }
        lc
    }

    #[test]
    fn spot_failure_ends_rolled_back() {
        let mut lc = executing();
        lc.finish(false, &RollbackOutcome::NotNeeded).unwrap();

        assert_eq!(lc.state(), RouteState::RolledBack);
        assert!(lc.is_finished());
        assert!(!lc.loan_open());
    }

    #[test]
    fn repaid_margin_failure_ends_rolled_back() {
        let mut lc = executing();
        let repaid = RollbackOutcome::Repaid {
            asset: "BTC".to_string(),
            amount: rust_decimal_macros::dec!(0.002),
        };
        lc.finish(false, &repaid).unwrap();

        assert_eq!(&lc.history()[5..], &[RouteState::Failed, RouteState::RolledBack]);
        assert!(lc.is_finished());
    }

    #[test]
    fn failed_repay_stops_at_failed_with_loan_open() {
        let mut lc = executing();
        let stuck = RollbackOutcome::Failed {
            asset: "BTC".to_string(),
            amount: rust_decimal_macros::dec!(0.002),
            reason: "margin account locked".to_string(),
        };
        lc.finish(false, &stuck).unwrap();

        assert_eq!(lc.state(), RouteState::Failed);
        assert!(lc.loan_open());
        assert!(lc.is_finished());
        assert!(lc.advance(RouteState::RolledBack).is_err());
    }

    #[test]
    fn success_finishes_without_rollback() {
        let mut lc = executing();
        lc.finish(true, &RollbackOutcome::NotNeeded).unwrap();
        assert_eq!(lc.state(), RouteState::Succeeded);
        assert!(lc.is_finished());
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut lc = lifecycle();
        let err = lc.advance(RouteState::Accepted).unwrap_err();
        assert_eq!(
            err,
            ArbitrageError::InvalidTransition {
                from: RouteState::Detected,
                to: RouteState::Accepted,
            }
        );
        assert_eq!(lc.state(), RouteState::Detected);
    }

    #[test]
    fn terminal_states_do_not_move() {
        let mut lc = lifecycle();
        lc.advance(RouteState::LiquidityChecked).unwrap();
        lc.advance(RouteState::RiskScored).unwrap();
        lc.advance(RouteState::Rejected).unwrap();
        assert!(lc.advance(RouteState::Accepted).is_err());
        assert!(lc.advance(RouteState::Detected).is_err());
    }

    #[test]
    fn state_display_is_snake_case() {
        assert_eq!(RouteState::LiquidityChecked.to_string(), "liquidity_checked");
    }
}
