//! Liquidity and risk evaluation.
//!
//! This module handles:
//! - Book quality confidence and per-hop liquidity checks
//! - Worst-case loss, loss probability and Kelly sizing
//! - Accept/reject decisions and the daily risk budget

pub mod calculator;
pub mod liquidity;

pub use calculator::{
    kelly_fraction, recommended_position_size, Decision, RejectReason, RiskCalculator,
    RiskFactor, RiskMetrics, RiskSettings, RiskSummary, SizingInput,
};
pub use liquidity::{HopLiquidity, LiquidityAnalyzer, LiquidityReport, LiquiditySettings};
