//! Profit, timing and priority calculations for opportunities.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use time::OffsetDateTime;

use super::route::Route;
use super::simulator::RouteSimulationResult;

/// Weights of the priority score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriorityWeights {
    /// Weight of `net_gain * profit_scale`.
    pub profit: Decimal,
    /// Weight of confidence.
    pub confidence: Decimal,
    /// Weight of the speed term.
    pub speed: Decimal,
    /// Weight of `1 - risk_score`.
    pub risk: Decimal,
    /// Multiplier turning a net gain fraction into a comparable score.
    pub profit_scale: Decimal,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            profit: dec!(0.4),
            confidence: dec!(0.3),
            speed: dec!(0.2),
            risk: dec!(0.1),
            profit_scale: dec!(1000),
        }
    }
}

impl PriorityWeights {
    /// Execution time at which the speed term reaches zero.
    pub const MAX_EXECUTION_SECS: Decimal = dec!(10);

    /// Weighted priority.
    pub fn score(
        &self,
        net_gain: Decimal,
        confidence: Decimal,
        execution_secs: Decimal,
        risk_score: Decimal,
    ) -> Decimal {
        let speed = (Decimal::ONE - execution_secs / Self::MAX_EXECUTION_SECS).max(Decimal::ZERO);
        self.profit * net_gain * self.profit_scale
            + self.confidence * confidence
            + self.speed * speed
            + self.risk * (Decimal::ONE - risk_score)
    }
}

/// Expected wall time in seconds to execute `hops` trades for `amount`.
pub fn estimate_execution_secs(hops: usize, amount: Decimal) -> Decimal {
    let hops = Decimal::from(hops);
    let complexity = Decimal::ONE + (hops - Decimal::TWO) * dec!(0.3);
    let size = Decimal::ONE + amount / dec!(1000) * dec!(0.1);
    dec!(0.5) * hops * complexity * size
}

/// Heuristic risk in `[0, 1]` from route length, size and thinness of the edge.
pub fn route_risk_score(hops: usize, amount: Decimal, net_gain: Decimal) -> Decimal {
    let mut risk = (Decimal::from(hops) - Decimal::TWO) * dec!(0.15);

    if amount > dec!(1000) {
        risk += ((amount - dec!(1000)) / dec!(10000)).min(dec!(0.3));
    }

    if net_gain < dec!(0.001) {
        risk += dec!(0.4);
    } else if net_gain < dec!(0.005) {
        risk += dec!(0.2);
    }

    risk.clamp(Decimal::ZERO, Decimal::ONE)
}

/// Apply margin interest for the holding period to a route factor.
///
/// The holding period is billed in whole hours, at least one.
pub fn interest_adjusted_factor(factor: Decimal, hourly_rate: Decimal, hold_secs: u64) -> Decimal {
    if hourly_rate.is_zero() {
        return factor;
    }
    let hours = (Decimal::from(hold_secs) / dec!(3600)).round().max(Decimal::ONE);
    factor * (Decimal::ONE - hourly_rate * hours)
}

/// Ranked, profitable route at a trial amount.
#[derive(Debug, Clone)]
pub struct Opportunity {
    /// Route.
    pub route: Route,
    /// Trial amount of the base asset.
    pub amount: Decimal,
    /// Simulated final amount of the base asset.
    pub final_amount: Decimal,
    /// Expected profit in the base asset, interest included.
    pub expected_profit: Decimal,
    /// Expected profit in percent.
    pub profit_pct: Decimal,
    /// Interest-adjusted `final / start - 1`.
    pub net_gain: Decimal,
    /// Book quality confidence in `[0, 1]`.
    pub confidence: Decimal,
    /// Estimated execution time in seconds.
    pub execution_secs: Decimal,
    /// Estimated total slippage.
    pub slippage: Decimal,
    /// Risk score in `[0, 1]`.
    pub risk_score: Decimal,
    /// Ranking key.
    pub priority: Decimal,
    /// Full simulation.
    pub simulation: RouteSimulationResult,
    /// When this opportunity was detected.
    pub detected_at: OffsetDateTime,
}

impl Opportunity {
    /// Number of trades.
    pub fn hops(&self) -> usize {
        self.route.hops()
    }

    /// Symbols traded, in hop order.
    pub fn symbols(&self) -> Vec<String> {
        self.simulation.symbols().map(str::to_string).collect()
    }

    /// Age of this opportunity.
    pub fn age(&self) -> time::Duration {
        OffsetDateTime::now_utc() - self.detected_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_time_grows_with_hops_and_size() {
        // 0.5 * 3 * 1.3 * 1.01
        assert_eq!(estimate_execution_secs(3, dec!(100)), dec!(1.9695));
        // 0.5 * 4 * 1.6 * 1.0
        assert_eq!(estimate_execution_secs(4, dec!(0)), dec!(3.2));
        assert!(estimate_execution_secs(4, dec!(100)) > estimate_execution_secs(3, dec!(100)));
        assert!(estimate_execution_secs(3, dec!(5000)) > estimate_execution_secs(3, dec!(100)));
    }

    #[test]
    fn risk_score_components() {
        assert_eq!(route_risk_score(3, dec!(100), dec!(0.01)), dec!(0.15));
        assert_eq!(route_risk_score(3, dec!(100), dec!(0.003)), dec!(0.35));
        assert_eq!(route_risk_score(3, dec!(100), dec!(0.0005)), dec!(0.55));
        assert_eq!(route_risk_score(4, dec!(3000), dec!(0.01)), dec!(0.5));
        // Large size term caps at 0.3 and the sum caps at 1.
        assert_eq!(route_risk_score(4, dec!(100000), dec!(0)), dec!(1));
    }

    #[test]
    fn interest_billed_in_whole_hours() {
        let factor = dec!(1.01);
        assert_eq!(interest_adjusted_factor(factor, dec!(0), 60), factor);
        // 60s rounds to 0h, billed as 1h.
        assert_eq!(interest_adjusted_factor(factor, dec!(0.0001), 60), dec!(1.01) * dec!(0.9999));
        assert_eq!(interest_adjusted_factor(factor, dec!(0.0001), 7200), dec!(1.01) * dec!(0.9998));
    }

    #[test]
    fn priority_weights_default() {
        let weights = PriorityWeights::default();
        // 0.4 * 0.01 * 1000 + 0.3 * 1 + 0.2 * (1 - 2/10) + 0.1 * (1 - 0.2)
        let score = weights.score(dec!(0.01), dec!(1), dec!(2), dec!(0.2));
        assert_eq!(score, dec!(4.54));
        // Speed term never goes negative.
        let slow = weights.score(dec!(0), dec!(0), dec!(30), dec!(1));
        assert_eq!(slow, Decimal::ZERO);
    }
}
