//! Book quality confidence and per-hop liquidity analysis.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::arbitrage::Route;
use crate::market::{FeeSource, MarketView, SymbolSet};
use crate::orderbook::{estimate_fill, MarketSnapshot};
use crate::trading::Side;

/// Thresholds for the liquidity check.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquiditySettings {
    /// Maximum total slippage for a viable route.
    pub slippage_tolerance: Decimal,
    /// Minimum per-hop liquidity score.
    pub min_liquidity_score: Decimal,
    /// Maximum total execution time in seconds.
    pub max_execution_secs: Decimal,
    /// Minimum levels on the side a hop consumes.
    pub min_levels: usize,
    /// Levels counted as available liquidity.
    pub depth_levels: usize,
    /// Books older than this are stale.
    pub max_book_age: time::Duration,
    /// 24h move (percent) that slows execution.
    pub volatile_change_pct: Decimal,
}

impl Default for LiquiditySettings {
    fn default() -> Self {
        Self {
            slippage_tolerance: dec!(0.005),
            min_liquidity_score: dec!(0.3),
            max_execution_secs: dec!(10),
            min_levels: 5,
            depth_levels: 10,
            max_book_age: time::Duration::seconds(5),
            volatile_change_pct: dec!(5),
        }
    }
}

/// Liquidity of one hop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopLiquidity {
    /// Zero-based hop index.
    pub hop: usize,
    /// Symbol traded.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Quote value this hop needs.
    pub required_quote: Decimal,
    /// Quote value of the top levels on the consumed side.
    pub available_quote: Decimal,
    /// `min(1, available / (required * 5))`.
    pub score: Decimal,
    /// `|avg - best| / best`.
    pub slippage: Decimal,
    /// Estimated seconds to fill.
    pub execution_secs: Decimal,
    /// Levels on the consumed side.
    pub levels: usize,
}

/// Outcome of a route liquidity check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidityReport {
    /// All conditions held.
    pub viable: bool,
    /// Sum of per-hop slippage.
    pub total_slippage: Decimal,
    /// Sum of per-hop execution time.
    pub total_execution_secs: Decimal,
    /// Hop with the lowest liquidity score.
    pub bottleneck_hop: Option<usize>,
    /// Per-hop detail, up to the first structural failure.
    pub hops: Vec<HopLiquidity>,
    /// One entry per failed condition.
    pub reasons: Vec<String>,
}

impl LiquidityReport {
    /// Mean hop score, zero without hops.
    pub fn avg_score(&self) -> Decimal {
        if self.hops.is_empty() {
            return Decimal::ZERO;
        }
        self.hops.iter().map(|h| h.score).sum::<Decimal>() / Decimal::from(self.hops.len())
    }

    /// Lowest hop score, zero without hops.
    pub fn min_score(&self) -> Decimal {
        self.hops
            .iter()
            .map(|h| h.score)
            .min()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Estimates book quality, slippage and fill time for routes.
#[derive(Clone)]
pub struct LiquidityAnalyzer {
    settings: LiquiditySettings,
    fees: Arc<dyn FeeSource>,
    slippage_pct: Decimal,
}

impl LiquidityAnalyzer {
    /// Create an analyzer.
    pub fn new(settings: LiquiditySettings, fees: Arc<dyn FeeSource>, slippage_pct: Decimal) -> Self {
        Self {
            settings,
            fees,
            slippage_pct,
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &LiquiditySettings {
        &self.settings
    }

    /// Fee source in use.
    pub fn fees(&self) -> &Arc<dyn FeeSource> {
        &self.fees
    }

    /// Confidence in `[0.1, 1]` that the books describe a tradable route.
    pub fn confidence(&self, route: &Route, snapshot: &MarketSnapshot, symbols: &SymbolSet) -> Decimal {
        let mut confidence = Decimal::ONE;

        for (from, to) in route.legs() {
            let Some(leg) = symbols.resolve(from, to) else {
                confidence *= dec!(0.3);
                continue;
            };
            let Some(book) = snapshot.book(&leg.symbol.name) else {
                confidence *= dec!(0.5);
                continue;
            };
            if book.has_empty_side() {
                confidence *= dec!(0.4);
                continue;
            }

            if let Some(spread) = book.spread_ratio() {
                if spread > dec!(0.01) {
                    confidence *= dec!(0.7);
                } else if spread > dec!(0.005) {
                    confidence *= dec!(0.85);
                }
            }

            if book.entry_count() < 10 {
                confidence *= dec!(0.8);
            }

            if snapshot
                .age_of(&leg.symbol.name)
                .is_some_and(|age| age > self.settings.max_book_age)
            {
                confidence *= dec!(0.7);
            }
        }

        confidence.max(dec!(0.1))
    }

    /// Walk `route` with `amount` and judge whether the books can carry it.
    #[instrument(level = "debug", skip_all, fields(route = %route, amount = %amount))]
    pub fn liquidity_check(&self, route: &Route, amount: Decimal, market: MarketView<'_>) -> LiquidityReport {
        let mut hops = Vec::with_capacity(route.hops());
        let mut reasons = Vec::new();
        let mut structural = false;
        let mut running = amount;

        for (hop, (from, to)) in route.legs().enumerate() {
            let Some(leg) = market.symbols.resolve(from, to) else {
                reasons.push(format!("hop {hop}: no tradable symbol for {from} -> {to}"));
                structural = true;
                break;
            };
            let symbol = leg.symbol.name.as_str();

            let Some(book) = market.snapshot.book(symbol) else {
                reasons.push(format!("hop {hop}: no order book for {symbol}"));
                structural = true;
                break;
            };

            let levels = book.levels_for(leg.side);
            if levels.len() < self.settings.min_levels {
                reasons.push(format!(
                    "hop {hop}: {symbol} has {} levels on the {} side, need {}",
                    levels.len(),
                    leg.side,
                    self.settings.min_levels
                ));
                structural = true;
            }

            let fill = match estimate_fill(levels, leg.side, running, self.slippage_pct) {
                Ok(fill) => fill,
                Err(e) => {
                    reasons.push(format!("hop {hop}: {e}"));
                    structural = true;
                    break;
                }
            };

            let required_quote = match leg.side {
                Side::Buy => running,
                Side::Sell => running * fill.best_price,
            };
            let available_quote = book.top_notional(leg.side, self.settings.depth_levels);
            let score = if required_quote > Decimal::ZERO {
                (available_quote / (required_quote * dec!(5))).min(Decimal::ONE)
            } else {
                Decimal::ONE
            };
            let execution_secs = self.hop_execution_secs(
                available_quote,
                required_quote,
                market.conditions.change_pct(symbol),
            );

            hops.push(HopLiquidity {
                hop,
                symbol: symbol.to_string(),
                side: leg.side,
                required_quote,
                available_quote,
                score,
                slippage: fill.slippage(),
                execution_secs,
                levels: levels.len(),
            });

            let gross = fill.convert(leg.side, running);
            running = gross * (Decimal::ONE - self.fees.taker_fee(symbol));
        }

        let total_slippage: Decimal = hops.iter().map(|h| h.slippage).sum();
        let total_execution_secs: Decimal = hops.iter().map(|h| h.execution_secs).sum();
        let bottleneck_hop = hops.iter().min_by_key(|h| h.score).map(|h| h.hop);

        if total_slippage > self.settings.slippage_tolerance {
            reasons.push(format!(
                "total slippage {} exceeds tolerance {}",
                total_slippage.round_dp(6),
                self.settings.slippage_tolerance
            ));
        }
        for h in hops.iter().filter(|h| h.score < self.settings.min_liquidity_score) {
            reasons.push(format!(
                "hop {}: {} liquidity score {} below {}",
                h.hop,
                h.symbol,
                h.score.round_dp(4),
                self.settings.min_liquidity_score
            ));
        }
        if total_execution_secs > self.settings.max_execution_secs {
            reasons.push(format!(
                "estimated execution {}s exceeds {}s",
                total_execution_secs.round_dp(2),
                self.settings.max_execution_secs
            ));
        }

        let viable = reasons.is_empty() && !structural;
        if !viable {
            debug!(reasons = ?reasons, "Route not viable");
        }

        LiquidityReport {
            viable,
            total_slippage,
            total_execution_secs,
            bottleneck_hop,
            hops,
            reasons,
        }
    }

    fn hop_execution_secs(&self, available: Decimal, required: Decimal, change_pct: Decimal) -> Decimal {
        let mut factor = if required <= Decimal::ZERO || available > required * dec!(10) {
            dec!(1.0)
        } else if available > required * dec!(5) {
            dec!(1.2)
        } else if available > required * dec!(2) {
            dec!(1.5)
        } else {
            dec!(2.0)
        };
        if change_pct > self.settings.volatile_change_pct {
            factor *= dec!(1.3);
        }
        dec!(0.5) * factor
    }
}
