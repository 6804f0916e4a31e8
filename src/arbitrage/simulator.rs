//! Hop-by-hop route simulation against a book snapshot.

use std::sync::Arc;

use rust_decimal::Decimal;
use smallvec::SmallVec;
use tracing::trace;

use super::route::Route;
use crate::error::ArbitrageError;
use crate::market::{FeeSource, ResolvedLeg, SymbolSet};
use crate::orderbook::{estimate_fill, MarketSnapshot};
use crate::trading::Side;

/// Priced breakdown of one hop.
#[derive(Debug, Clone, PartialEq)]
pub struct HopQuote {
    /// Asset spent.
    pub from: String,
    /// Asset received.
    pub to: String,
    /// Symbol traded.
    pub symbol: String,
    /// Order side.
    pub side: Side,
    /// Amount of `from` spent.
    pub amount_in: Decimal,
    /// Average execution price.
    pub price: Decimal,
    /// Best price on the side walked.
    pub best_price: Decimal,
    /// Taker fee rate applied.
    pub fee_rate: Decimal,
    /// Fee charged, in units of `to`.
    pub fee: Decimal,
    /// Amount of `to` received after fees.
    pub amount_out: Decimal,
}

impl HopQuote {
    /// Relative gap between average and best price.
    pub fn slippage(&self) -> Decimal {
        if self.best_price.is_zero() {
            return Decimal::ZERO;
        }
        ((self.price - self.best_price) / self.best_price).abs()
    }
}

/// Outcome of simulating a route at one start amount.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSimulationResult {
    /// Route simulated.
    pub route: Route,
    /// Amount of the base asset put in.
    pub start_amount: Decimal,
    /// Amount of the base asset coming out. Zero when infeasible.
    pub final_amount: Decimal,
    /// Per-hop breakdown, up to the failing hop.
    pub hops: SmallVec<[HopQuote; 4]>,
    /// Whether every hop could be priced.
    pub feasible: bool,
    /// Why the route is infeasible.
    pub failure: Option<ArbitrageError>,
}

impl RouteSimulationResult {
    fn infeasible(
        route: &Route,
        start_amount: Decimal,
        hops: SmallVec<[HopQuote; 4]>,
        failure: ArbitrageError,
    ) -> Self {
        Self {
            route: route.clone(),
            start_amount,
            final_amount: Decimal::ZERO,
            hops,
            feasible: false,
            failure: Some(failure),
        }
    }

    /// `final / start`, zero when infeasible.
    pub fn factor(&self) -> Decimal {
        if !self.feasible || self.start_amount.is_zero() {
            return Decimal::ZERO;
        }
        self.final_amount / self.start_amount
    }

    /// Absolute gain in the base asset.
    pub fn profit(&self) -> Decimal {
        self.final_amount - self.start_amount
    }

    /// Sum of per-hop slippage.
    pub fn total_slippage(&self) -> Decimal {
        self.hops.iter().map(HopQuote::slippage).sum()
    }

    /// Symbols traded, in hop order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.hops.iter().map(|h| h.symbol.as_str())
    }
}

/// Resolve every leg of `route` against `symbols`.
pub fn resolve_route<'a>(
    route: &Route,
    symbols: &'a SymbolSet,
) -> Result<SmallVec<[ResolvedLeg<'a>; 4]>, ArbitrageError> {
    route
        .legs()
        .map(|(from, to)| {
            symbols
                .resolve(from, to)
                .ok_or_else(|| ArbitrageError::SymbolNotFound {
                    from: from.to_string(),
                    to: to.to_string(),
                })
        })
        .collect()
}

/// Prices routes through the book and fee model.
#[derive(Clone)]
pub struct RouteSimulator {
    fees: Arc<dyn FeeSource>,
    slippage_pct: Decimal,
}

impl RouteSimulator {
    /// Create a simulator charging `slippage_pct` on unfilled remainders.
    pub fn new(fees: Arc<dyn FeeSource>, slippage_pct: Decimal) -> Self {
        Self { fees, slippage_pct }
    }

    /// Fee source in use.
    pub fn fees(&self) -> &Arc<dyn FeeSource> {
        &self.fees
    }

    /// Remainder slippage penalty.
    pub fn slippage_pct(&self) -> Decimal {
        self.slippage_pct
    }

    /// Walk `route` starting with `start_amount` of its base asset.
    ///
    /// Never fails: infeasibility is reported in the result. All legs are
    /// resolved before any hop is priced.
    pub fn simulate(
        &self,
        route: &Route,
        start_amount: Decimal,
        snapshot: &MarketSnapshot,
        symbols: &SymbolSet,
    ) -> RouteSimulationResult {
        let mut hops = SmallVec::new();

        if start_amount <= Decimal::ZERO {
            return RouteSimulationResult::infeasible(
                route,
                start_amount,
                hops,
                ArbitrageError::InvalidSize(start_amount),
            );
        }

        let legs = match resolve_route(route, symbols) {
            Ok(legs) => legs,
            Err(e) => return RouteSimulationResult::infeasible(route, start_amount, hops, e),
        };

        let mut amount = start_amount;
        for (hop, ((from, to), leg)) in route.legs().zip(legs.iter()).enumerate() {
            let symbol = leg.symbol.name.as_str();
            let Some(book) = snapshot.book(symbol) else {
                return RouteSimulationResult::infeasible(
                    route,
                    start_amount,
                    hops,
                    ArbitrageError::MissingBook {
                        symbol: symbol.to_string(),
                    },
                );
            };

            let levels = book.levels_for(leg.side);
            if levels.is_empty() {
                return RouteSimulationResult::infeasible(
                    route,
                    start_amount,
                    hops,
                    ArbitrageError::EmptyBookSide {
                        symbol: symbol.to_string(),
                        side: leg.side,
                    },
                );
            }

            let fill = match estimate_fill(levels, leg.side, amount, self.slippage_pct) {
                Ok(fill) => fill,
                Err(e) => return RouteSimulationResult::infeasible(route, start_amount, hops, e),
            };

            let fee_rate = self.fees.taker_fee(symbol);
            let gross = fill.convert(leg.side, amount);
            let fee = gross * fee_rate;
            let amount_out = gross - fee;

            trace!(
                hop,
                symbol,
                side = %leg.side,
                price = %fill.price,
                amount_in = %amount,
                amount_out = %amount_out,
                "Hop priced"
            );

            hops.push(HopQuote {
                from: from.to_string(),
                to: to.to_string(),
                symbol: symbol.to_string(),
                side: leg.side,
                amount_in: amount,
                price: fill.price,
                best_price: fill.best_price,
                fee_rate,
                fee,
                amount_out,
            });

            if amount_out <= Decimal::ZERO {
                return RouteSimulationResult::infeasible(
                    route,
                    start_amount,
                    hops,
                    ArbitrageError::NonPositiveAmount { hop },
                );
            }
            amount = amount_out;
        }

        RouteSimulationResult {
            route: route.clone(),
            start_amount,
            final_amount: amount,
            hops,
            feasible: true,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{FeeTable, Symbol};
    use crate::orderbook::{PriceLevel, SymbolBook};
    use rust_decimal_macros::dec;
    use time::OffsetDateTime;

    fn symbols() -> SymbolSet {
        SymbolSet::new([
            Symbol::new("BTC", "USDT"),
            Symbol::new("ETH", "BTC"),
            Symbol::new("ETH", "USDT"),
        ])
    }

    fn book(symbol: &str, bid: Decimal, ask: Decimal) -> SymbolBook {
        SymbolBook::new(
            symbol,
            vec![PriceLevel::new(bid, dec!(1000))],
            vec![PriceLevel::new(ask, dec!(1000))],
            OffsetDateTime::now_utc(),
        )
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot::from_books([
            book("BTCUSDT", dec!(49990), dec!(50000)),
            book("ETHBTC", dec!(0.0499), dec!(0.05)),
            book("ETHUSDT", dec!(2600), dec!(2601)),
        ])
    }

    fn simulator(fee: Decimal) -> RouteSimulator {
        RouteSimulator::new(Arc::new(FeeTable::flat(fee, fee)), dec!(0.001))
    }

    fn route() -> Route {
        Route::cycle("USDT", &["BTC", "ETH"]).unwrap()
    }

    #[test]
    fn hand_computed_triangle() {
        let result = simulator(dec!(0.001)).simulate(&route(), dec!(100), &snapshot(), &symbols());
        assert!(result.feasible, "{:?}", result.failure);
        assert_eq!(result.hops.len(), 3);
        assert_eq!(result.hops[0].side, Side::Buy);
        assert_eq!(result.hops[1].side, Side::Buy);
        assert_eq!(result.hops[2].side, Side::Sell);
        // 100 / 50000 * 0.999 / 0.05 * 0.999 * 2600 * 0.999
        assert_eq!(result.final_amount.round_dp(6), dec!(103.688312));
    }

    #[test]
    fn missing_symbol_is_infeasible() {
        let route = Route::cycle("USDT", &["BTC", "DOGE"]).unwrap();
        let result = simulator(dec!(0.001)).simulate(&route, dec!(100), &snapshot(), &symbols());
        assert!(!result.feasible);
        assert!(result.hops.is_empty());
        assert!(matches!(
            result.failure,
            Some(ArbitrageError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn empty_side_is_infeasible() {
        let mut snapshot = snapshot();
        snapshot.insert(SymbolBook::new(
            "ETHBTC",
            vec![PriceLevel::new(dec!(0.0499), dec!(10))],
            vec![],
            OffsetDateTime::now_utc(),
        ));
        let result = simulator(dec!(0.001)).simulate(&route(), dec!(100), &snapshot, &symbols());
        assert!(!result.feasible);
        assert_eq!(result.final_amount, Decimal::ZERO);
        assert_eq!(result.hops.len(), 1);
        assert!(matches!(
            result.failure,
            Some(ArbitrageError::EmptyBookSide { side: Side::Buy, .. })
        ));
    }

    #[test]
    fn missing_book_is_infeasible() {
        let mut snapshot = snapshot();
        snapshot.books.remove("ETHUSDT");
        let result = simulator(dec!(0.001)).simulate(&route(), dec!(100), &snapshot, &symbols());
        assert!(matches!(result.failure, Some(ArbitrageError::MissingBook { .. })));
    }

    #[test]
    fn higher_fee_strictly_lowers_final_amount() {
        let low = simulator(dec!(0.001)).simulate(&route(), dec!(100), &snapshot(), &symbols());
        let high = simulator(dec!(0.0011)).simulate(&route(), dec!(100), &snapshot(), &symbols());

        let one_hop = RouteSimulator::new(
            Arc::new(FeeTable::default().with_override("ETHBTC", dec!(0.002), dec!(0.002))),
            dec!(0.001),
        )
        .simulate(&route(), dec!(100), &snapshot(), &symbols());

        assert!(high.final_amount < low.final_amount);
        assert!(one_hop.final_amount < low.final_amount);
    }

    #[test]
    fn non_positive_start_is_infeasible() {
        let result = simulator(dec!(0.001)).simulate(&route(), dec!(0), &snapshot(), &symbols());
        assert!(matches!(result.failure, Some(ArbitrageError::InvalidSize(_))));
    }
}
