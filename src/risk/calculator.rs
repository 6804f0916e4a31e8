//! Worst-case loss, loss probability, sizing and the accept/reject decision.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use strum::{Display, EnumString};
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tracing::{debug, info, instrument};

use super::liquidity::{LiquidityAnalyzer, LiquidityReport};
use crate::arbitrage::{Opportunity, Route};
use crate::market::{route_fee_fraction, MarketView};

/// Risk limits.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSettings {
    /// Largest fraction of capital per trade.
    pub max_position_risk: Decimal,
    /// Largest fraction of capital committed per UTC day.
    pub max_daily_risk: Decimal,
    /// Trades allowed per UTC day.
    pub max_daily_trades: u32,
    /// Minimum confidence to accept.
    pub min_confidence: Decimal,
    /// Minimum profit / max loss.
    pub min_risk_reward: Decimal,
    /// Largest worst-case loss in percent of the amount.
    pub max_loss_pct: Decimal,
    /// Factors that reject on their own.
    pub critical_factors: Vec<RiskFactor>,
    /// Fraction of capital above which a position counts as large.
    pub large_position_fraction: Decimal,
    /// Absolute cap on the recommended size.
    pub max_position_size: Option<Decimal>,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_position_risk: dec!(0.02),
            max_daily_risk: dec!(0.10),
            max_daily_trades: 50,
            min_confidence: dec!(0.4),
            min_risk_reward: dec!(2.0),
            max_loss_pct: dec!(3),
            critical_factors: vec![RiskFactor::InsufficientLiquidity, RiskFactor::DailyRiskNearLimit],
            large_position_fraction: dec!(0.1),
            max_position_size: None,
        }
    }
}

/// Tagged risk condition found during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskFactor {
    InsufficientLiquidity,
    HighSlippage,
    HighVolatility,
    LowVolume,
    SlowExecution,
    LargePosition,
    DailyRiskNearLimit,
}

/// Risk assessment of a route at an amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskMetrics {
    /// Worst-case loss in the base asset.
    pub max_loss: Decimal,
    /// Worst-case loss in percent of the amount.
    pub max_loss_pct: Decimal,
    /// Estimated probability of losing money.
    pub loss_probability: Decimal,
    /// `profit * (1 - p) - max_loss * p`.
    pub risk_adjusted_return: Decimal,
    /// `profit / max_loss`.
    pub risk_reward: Decimal,
    /// Execution confidence in `[0.1, 1]`.
    pub confidence: Decimal,
    /// Tagged conditions.
    pub factors: Vec<RiskFactor>,
    /// Size the evaluator is willing to trade.
    pub recommended_size: Decimal,
    /// Underlying liquidity check.
    pub liquidity: LiquidityReport,
}

/// Why a route was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("risk/reward {ratio} below {min}")]
    LowRiskReward { ratio: Decimal, min: Decimal },

    #[error("confidence {confidence} below {min}")]
    LowConfidence { confidence: Decimal, min: Decimal },

    #[error("risk-adjusted return {0} is not positive")]
    NonPositiveReturn(Decimal),

    #[error("max loss {pct}% above {max}%")]
    MaxLossTooHigh { pct: Decimal, max: Decimal },

    #[error("daily risk budget used ({used} of {max})")]
    DailyRiskExhausted { used: Decimal, max: Decimal },

    #[error("daily trade limit reached ({count} of {max})")]
    DailyTradeLimit { count: u32, max: u32 },

    #[error("critical risk factor: {0}")]
    CriticalFactor(RiskFactor),
}

/// Accept/reject outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Trade may proceed.
    Accept,
    /// Trade must not proceed.
    Reject(RejectReason),
}

impl Decision {
    /// Whether the route was accepted.
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept)
    }
}

/// Inputs to the position sizing rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingInput {
    /// Amount asked for.
    pub requested: Decimal,
    /// Capital available in the base asset.
    pub capital: Decimal,
    /// Win probability proxy.
    pub confidence: Decimal,
    /// Expected profit in the base asset.
    pub expected_profit: Decimal,
    /// Worst-case loss in the base asset.
    pub max_loss: Decimal,
    /// Fraction of the daily budget already used.
    pub daily_used: Decimal,
}

/// Kelly fraction capped at 25%.
pub fn kelly_fraction(confidence: Decimal, expected_profit: Decimal, max_loss: Decimal) -> Decimal {
    if max_loss <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let edge = confidence * expected_profit - (Decimal::ONE - confidence) * max_loss;
    (edge / max_loss).clamp(Decimal::ZERO, dec!(0.25))
}

/// Tightest of the requested amount, per-trade cap, remaining daily budget,
/// Kelly size and absolute position cap, never negative.
pub fn recommended_position_size(input: &SizingInput, settings: &RiskSettings) -> Decimal {
    let kelly = kelly_fraction(input.confidence, input.expected_profit, input.max_loss);
    let mut size = input
        .requested
        .min(input.capital * settings.max_position_risk)
        .min(input.capital * (settings.max_daily_risk - input.daily_used))
        .min(input.capital * kelly);
    if let Some(cap) = settings.max_position_size {
        size = size.min(cap);
    }
    size.max(Decimal::ZERO)
}

/// Capital and budget overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSummary {
    pub capital: Decimal,
    pub daily_risk_used_pct: Decimal,
    pub daily_risk_remaining_pct: Decimal,
    pub max_position_size: Decimal,
    pub daily_trades: u32,
    pub max_daily_trades: u32,
    pub max_daily_risk_pct: Decimal,
}

#[derive(Debug)]
struct DailyRisk {
    date: Date,
    used: Decimal,
    trades: u32,
}

impl DailyRisk {
    fn new(date: Date) -> Self {
        Self {
            date,
            used: Decimal::ZERO,
            trades: 0,
        }
    }

    fn roll(&mut self, today: Date) {
        if self.date != today {
            debug!(previous = %self.date, today = %today, "Daily risk rolled over");
            *self = Self::new(today);
        }
    }
}

/// Evaluates opportunities against risk limits and tracks the daily budget.
pub struct RiskCalculator {
    settings: RiskSettings,
    analyzer: LiquidityAnalyzer,
    daily: Mutex<DailyRisk>,
}

impl RiskCalculator {
    /// Create a calculator.
    pub fn new(settings: RiskSettings, analyzer: LiquidityAnalyzer) -> Self {
        Self {
            settings,
            analyzer,
            daily: Mutex::new(DailyRisk::new(OffsetDateTime::now_utc().date())),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    /// Liquidity analyzer in use.
    pub fn analyzer(&self) -> &LiquidityAnalyzer {
        &self.analyzer
    }

    fn daily(&self) -> MutexGuard<'_, DailyRisk> {
        let mut daily = self.daily.lock().unwrap_or_else(PoisonError::into_inner);
        daily.roll(OffsetDateTime::now_utc().date());
        daily
    }

    /// Fraction of capital used today and trades made today.
    pub fn daily_state(&self) -> (Decimal, u32) {
        let daily = self.daily();
        (daily.used, daily.trades)
    }

    /// Assess `route` at `amount` given its expected profit.
    #[instrument(level = "debug", skip_all, fields(route = %route, amount = %amount))]
    pub fn risk_metrics(
        &self,
        route: &Route,
        amount: Decimal,
        expected_profit: Decimal,
        market: MarketView<'_>,
        capital: Decimal,
    ) -> RiskMetrics {
        let liquidity = self.analyzer.liquidity_check(route, amount, market);
        let liq_settings = self.analyzer.settings();
        let slippage = liquidity.total_slippage;
        let exec_secs = liquidity.total_execution_secs;

        let symbols: Vec<&str> = route
            .legs()
            .filter_map(|(from, to)| market.symbols.resolve(from, to))
            .map(|leg| leg.symbol.name.as_str())
            .collect();

        // Worst case
        let fee_fraction = route_fee_fraction(self.analyzer.fees().as_ref(), symbols.iter().copied());
        let volatility_cost: Decimal = symbols
            .iter()
            .map(|s| amount * market.conditions.change_pct(s) / dec!(100) * dec!(0.1))
            .sum();
        let max_loss = (slippage * amount
            + fee_fraction * amount
            + dec!(0.5) * volatility_cost
            + dec!(0.001) * amount)
            .min(amount * dec!(0.05));
        let max_loss_pct = if amount > Decimal::ZERO {
            max_loss / amount * dec!(100)
        } else {
            Decimal::ZERO
        };

        // Loss probability
        let mut loss_probability = dec!(0.1);
        if !liquidity.viable {
            loss_probability += dec!(0.3);
        }
        if slippage > dec!(0.005) {
            loss_probability += dec!(0.2);
        }
        if market.conditions.high_volatility {
            loss_probability += dec!(0.15);
        }
        if market.conditions.low_volume {
            loss_probability += dec!(0.1);
        }
        if exec_secs > dec!(5) {
            loss_probability += (exec_secs / dec!(25)).min(dec!(0.2));
        }
        let loss_probability = loss_probability.min(dec!(0.8));

        let risk_adjusted_return =
            expected_profit * (Decimal::ONE - loss_probability) - max_loss * loss_probability;
        let risk_reward = if max_loss > Decimal::ZERO {
            expected_profit / max_loss
        } else {
            Decimal::ZERO
        };

        // Confidence
        let mut confidence = Decimal::ONE;
        if !liquidity.viable {
            confidence -= dec!(0.4);
        }
        if slippage > dec!(0.002) {
            confidence -= (slippage * dec!(100)).min(dec!(0.3));
        }
        if liquidity.avg_score() < dec!(0.5) {
            confidence -= dec!(0.2);
        }
        if exec_secs > dec!(3) {
            confidence -= (exec_secs / dec!(20)).min(dec!(0.2));
        }
        let confidence = confidence.max(dec!(0.1));

        let (daily_used, _) = self.daily_state();

        let mut factors = Vec::new();
        let structural = liquidity.hops.len() < route.hops();
        if structural || liquidity.min_score() < liq_settings.min_liquidity_score {
            factors.push(RiskFactor::InsufficientLiquidity);
        }
        if slippage > liq_settings.slippage_tolerance {
            factors.push(RiskFactor::HighSlippage);
        }
        if market.conditions.high_volatility {
            factors.push(RiskFactor::HighVolatility);
        }
        if market.conditions.low_volume {
            factors.push(RiskFactor::LowVolume);
        }
        if exec_secs > dec!(5) {
            factors.push(RiskFactor::SlowExecution);
        }
        if amount > capital * self.settings.large_position_fraction {
            factors.push(RiskFactor::LargePosition);
        }
        if daily_used > self.settings.max_daily_risk * dec!(0.8) {
            factors.push(RiskFactor::DailyRiskNearLimit);
        }

        let recommended_size = recommended_position_size(
            &SizingInput {
                requested: amount,
                capital,
                confidence,
                expected_profit,
                max_loss,
                daily_used,
            },
            &self.settings,
        );

        RiskMetrics {
            max_loss,
            max_loss_pct,
            loss_probability,
            risk_adjusted_return,
            risk_reward,
            confidence,
            factors,
            recommended_size,
            liquidity,
        }
    }

    /// Apply the rejection rules to `metrics`.
    pub fn decision(&self, metrics: &RiskMetrics) -> Decision {
        let (used, trades) = self.daily_state();
        let s = &self.settings;

        let reject = if metrics.risk_reward < s.min_risk_reward {
            Some(RejectReason::LowRiskReward {
                ratio: metrics.risk_reward.round_dp(4),
                min: s.min_risk_reward,
            })
        } else if metrics.confidence < s.min_confidence {
            Some(RejectReason::LowConfidence {
                confidence: metrics.confidence,
                min: s.min_confidence,
            })
        } else if metrics.risk_adjusted_return <= Decimal::ZERO {
            Some(RejectReason::NonPositiveReturn(metrics.risk_adjusted_return))
        } else if metrics.max_loss_pct > s.max_loss_pct {
            Some(RejectReason::MaxLossTooHigh {
                pct: metrics.max_loss_pct.round_dp(4),
                max: s.max_loss_pct,
            })
        } else if used >= s.max_daily_risk {
            Some(RejectReason::DailyRiskExhausted {
                used,
                max: s.max_daily_risk,
            })
        } else if trades >= s.max_daily_trades {
            Some(RejectReason::DailyTradeLimit {
                count: trades,
                max: s.max_daily_trades,
            })
        } else {
            metrics
                .factors
                .iter()
                .find(|f| s.critical_factors.contains(f))
                .map(|f| RejectReason::CriticalFactor(*f))
        };

        match reject {
            Some(reason) => Decision::Reject(reason),
            None => Decision::Accept,
        }
    }

    /// Assess and decide on an opportunity.
    pub fn evaluate(
        &self,
        opportunity: &Opportunity,
        market: MarketView<'_>,
        capital: Decimal,
    ) -> (RiskMetrics, Decision) {
        let metrics = self.risk_metrics(
            &opportunity.route,
            opportunity.amount,
            opportunity.expected_profit,
            market,
            capital,
        );
        let decision = self.decision(&metrics);
        match &decision {
            Decision::Accept => info!(
                route = %opportunity.route,
                amount = %opportunity.amount,
                profit = %opportunity.expected_profit,
                max_loss = %metrics.max_loss.round_dp(6),
                confidence = %metrics.confidence.round_dp(3),
                recommended = %metrics.recommended_size.round_dp(4),
                "Opportunity accepted"
            ),
            Decision::Reject(reason) => info!(
                route = %opportunity.route,
                amount = %opportunity.amount,
                profit = %opportunity.expected_profit,
                reason = %reason,
                "Opportunity rejected"
            ),
        }
        (metrics, decision)
    }

    /// Charge an executed amount against today's budget.
    pub fn record_execution(&self, amount: Decimal, capital: Decimal) {
        let mut daily = self.daily();
        if capital > Decimal::ZERO {
            daily.used += amount / capital;
        }
        daily.trades += 1;
    }

    /// Clear today's budget.
    pub fn reset_daily(&self) {
        let mut daily = self.daily();
        daily.used = Decimal::ZERO;
        daily.trades = 0;
    }

    /// Budget overview for `capital`.
    pub fn risk_summary(&self, capital: Decimal) -> RiskSummary {
        let (used, trades) = self.daily_state();
        let mut max_position_size = capital * self.settings.max_position_risk;
        if let Some(cap) = self.settings.max_position_size {
            max_position_size = max_position_size.min(cap);
        }
        RiskSummary {
            capital,
            daily_risk_used_pct: used * dec!(100),
            daily_risk_remaining_pct: ((self.settings.max_daily_risk - used) * dec!(100))
                .max(Decimal::ZERO),
            max_position_size,
            daily_trades: trades,
            max_daily_trades: self.settings.max_daily_trades,
            max_daily_risk_pct: self.settings.max_daily_risk * dec!(100),
        }
    }

    #[cfg(test)]
    fn set_daily_date(&self, date: Date) {
        self.daily.lock().unwrap_or_else(PoisonError::into_inner).date = date;
    }
}
