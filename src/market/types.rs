//! Market metadata types: symbols, filters and 24h ticker statistics.

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::orderbook::MarketSnapshot;
use crate::trading::Side;

/// Tradable pair metadata from the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    /// Exchange symbol, `base + quote` (e.g. `ETHBTC`).
    pub name: String,
    /// Base asset.
    pub base: String,
    /// Quote asset.
    pub quote: String,
    /// Whether the symbol currently accepts orders.
    pub tradable: bool,
    /// Lot size step for quantities.
    pub step_size: Decimal,
    /// Minimum order quantity.
    pub min_qty: Decimal,
    /// Minimum order notional in quote.
    pub min_notional: Decimal,
    /// Price tick.
    pub tick_size: Decimal,
}

impl Symbol {
    /// Create a tradable symbol with no filters.
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        let base = base.into();
        let quote = quote.into();
        Self {
            name: format!("{base}{quote}"),
            base,
            quote,
            tradable: true,
            step_size: Decimal::ZERO,
            min_qty: Decimal::ZERO,
            min_notional: Decimal::ZERO,
            tick_size: Decimal::ZERO,
        }
    }

    /// Set the lot size filter.
    pub fn with_lot_size(mut self, step_size: Decimal, min_qty: Decimal) -> Self {
        self.step_size = step_size;
        self.min_qty = min_qty;
        self
    }

    /// Set the minimum notional filter.
    pub fn with_min_notional(mut self, min_notional: Decimal) -> Self {
        self.min_notional = min_notional;
        self
    }

    /// Floor a base quantity to this symbol's lot step.
    pub fn format_quantity(&self, quantity: Decimal) -> Decimal {
        format_quantity(quantity, self.step_size)
    }

    /// Check a base quantity against the lot size and notional filters.
    pub fn check_filters(&self, quantity: Decimal, price: Decimal) -> Result<(), String> {
        if quantity < self.min_qty {
            return Err(format!(
                "{}: quantity {} below min {}",
                self.name, quantity, self.min_qty
            ));
        }
        if quantity * price < self.min_notional {
            return Err(format!(
                "{}: notional {} below min {}",
                self.name,
                quantity * price,
                self.min_notional
            ));
        }
        Ok(())
    }
}

/// Floor `quantity` to a multiple of `step`. A zero step leaves it unchanged.
pub fn format_quantity(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    ((quantity / step).floor() * step).normalize()
}

/// A leg resolved against the symbol set.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedLeg<'a> {
    /// Symbol traded.
    pub symbol: &'a Symbol,
    /// Sell when the source asset is the base, buy when it is the quote.
    pub side: Side,
}

/// Set of valid symbols for the current refresh period.
#[derive(Debug, Clone, Default)]
pub struct SymbolSet {
    symbols: HashMap<String, Symbol>,
}

impl SymbolSet {
    /// Build a set from symbols.
    pub fn new(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            symbols: symbols.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// Look up a tradable symbol by name.
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name).filter(|s| s.tradable)
    }

    /// Whether a tradable symbol exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Resolve the leg `from -> to`.
    ///
    /// `from + to` trades as a sell of `from`; otherwise `to + from` trades as
    /// a buy of `to`.
    pub fn resolve(&self, from: &str, to: &str) -> Option<ResolvedLeg<'_>> {
        if let Some(symbol) = self.get(&format!("{from}{to}")) {
            return Some(ResolvedLeg {
                symbol,
                side: Side::Sell,
            });
        }
        self.get(&format!("{to}{from}")).map(|symbol| ResolvedLeg {
            symbol,
            side: Side::Buy,
        })
    }

    /// Tradable symbols quoted in `quote`.
    pub fn quoted_in<'a>(&'a self, quote: &'a str) -> impl Iterator<Item = &'a Symbol> + 'a {
        self.symbols
            .values()
            .filter(move |s| s.tradable && s.quote == quote)
    }

    /// Symbols that connect any two of `assets`.
    pub fn connecting(&self, assets: &[String]) -> Vec<String> {
        let mut names = BTreeSet::new();
        for (i, a) in assets.iter().enumerate() {
            for b in &assets[i + 1..] {
                if let Some(leg) = self.resolve(a, b) {
                    names.insert(leg.symbol.name.clone());
                }
            }
        }
        names.into_iter().collect()
    }

    /// Number of tradable symbols.
    pub fn len(&self) -> usize {
        self.symbols.values().filter(|s| s.tradable).count()
    }

    /// Whether no tradable symbol is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rolling 24h statistics for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker24h {
    /// Exchange symbol.
    pub symbol: String,
    /// Price change over 24h in percent.
    pub price_change_pct: Decimal,
    /// Last traded price.
    pub last_price: Decimal,
    /// Base asset volume.
    pub volume: Decimal,
    /// Quote asset volume.
    pub quote_volume: Decimal,
}

/// Market regime inputs to the risk evaluator.
#[derive(Debug, Clone, Default)]
pub struct MarketConditions {
    /// 24h price change percent per symbol.
    pub price_change_pct: HashMap<String, Decimal>,
    /// Proxy symbol moved more than 5% in 24h.
    pub high_volatility: bool,
    /// Proxy symbol traded below the volume floor.
    pub low_volume: bool,
}

impl MarketConditions {
    /// Absolute percent change threshold for high volatility.
    pub const HIGH_VOLATILITY_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 0);
    /// Base volume floor for the proxy symbol.
    pub const LOW_VOLUME_FLOOR: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

    /// Derive conditions from tickers using `proxy` as the market gauge.
    pub fn from_tickers(tickers: &[Ticker24h], proxy: &str) -> Self {
        let price_change_pct = tickers
            .iter()
            .map(|t| (t.symbol.clone(), t.price_change_pct))
            .collect();

        let (high_volatility, low_volume) = tickers
            .iter()
            .find(|t| t.symbol == proxy)
            .map(|t| {
                (
                    t.price_change_pct.abs() > Self::HIGH_VOLATILITY_PCT,
                    t.volume < Self::LOW_VOLUME_FLOOR,
                )
            })
            .unwrap_or((false, false));

        Self {
            price_change_pct,
            high_volatility,
            low_volume,
        }
    }

    /// Absolute 24h change for a symbol, zero when unknown.
    pub fn change_pct(&self, symbol: &str) -> Decimal {
        self.price_change_pct
            .get(symbol)
            .map(|c| c.abs())
            .unwrap_or(Decimal::ZERO)
    }
}

/// Borrowed view of everything the evaluator reads in one cycle.
#[derive(Debug, Clone, Copy)]
pub struct MarketView<'a> {
    /// Books for the cycle.
    pub snapshot: &'a MarketSnapshot,
    /// Valid symbols.
    pub symbols: &'a SymbolSet,
    /// 24h regime.
    pub conditions: &'a MarketConditions,
}

impl<'a> MarketView<'a> {
    /// Bundle the cycle inputs.
    pub fn new(
        snapshot: &'a MarketSnapshot,
        symbols: &'a SymbolSet,
        conditions: &'a MarketConditions,
    ) -> Self {
        Self {
            snapshot,
            symbols,
            conditions,
        }
    }
}
