//! Fill price estimation by walking book depth.

use rust_decimal::Decimal;
use tracing::instrument;

use super::types::PriceLevel;
use crate::error::ArbitrageError;
use crate::trading::Side;

/// Result of walking one side of the book.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEstimate {
    /// Volume-weighted price in quote per base, remainder penalty included.
    pub price: Decimal,
    /// Best price on the side walked.
    pub best_price: Decimal,
    /// Amount of the input (quote for buys, base for sells) matched by book levels.
    pub filled: Decimal,
    /// Input left over once the levels ran out.
    pub unfilled: Decimal,
    /// Number of levels touched.
    pub levels_used: usize,
}

impl FillEstimate {
    /// Relative distance between the average and the best price.
    pub fn slippage(&self) -> Decimal {
        if self.best_price.is_zero() {
            return Decimal::ZERO;
        }
        ((self.price - self.best_price) / self.best_price).abs()
    }

    /// Convert `amount_in` into the other asset at the estimated price.
    pub fn convert(&self, side: Side, amount_in: Decimal) -> Decimal {
        match side {
            Side::Buy => amount_in / self.price,
            Side::Sell => amount_in * self.price,
        }
    }
}

/// Walk `levels` to fill `quantity` and report the average price.
///
/// For a sell `quantity` is base units. For a buy it is the quote amount to
/// spend, consumed level by level at each level's notional. Whatever the book
/// cannot absorb is priced at the last level moved against the taker by
/// `slippage_pct`.
#[instrument(level = "trace", skip_all, fields(side = %side, quantity = %quantity))]
pub fn estimate_fill(
    levels: &[PriceLevel],
    side: Side,
    quantity: Decimal,
    slippage_pct: Decimal,
) -> Result<FillEstimate, ArbitrageError> {
    if quantity <= Decimal::ZERO {
        return Err(ArbitrageError::InvalidSize(quantity));
    }

    let Some(best_price) = levels.first().map(|l| l.price) else {
        return Err(ArbitrageError::InsufficientLiquidity {
            required: quantity,
            available: Decimal::ZERO,
        });
    };
    let mut last_price = best_price;

    let mut remaining = quantity;
    // Always in quote and base units respectively.
    let mut quote = Decimal::ZERO;
    let mut base = Decimal::ZERO;
    let mut levels_used = 0;

    for level in levels {
        if remaining.is_zero() {
            break;
        }
        if level.price <= Decimal::ZERO || level.quantity <= Decimal::ZERO {
            continue;
        }

        match side {
            Side::Buy => {
                let take = remaining.min(level.notional());
                quote += take;
                base += take / level.price;
                remaining -= take;
            }
            Side::Sell => {
                let take = remaining.min(level.quantity);
                base += take;
                quote += take * level.price;
                remaining -= take;
            }
        }
        last_price = level.price;
        levels_used += 1;
    }

    if !remaining.is_zero() {
        match side {
            Side::Buy => {
                let penalty_price = last_price * (Decimal::ONE + slippage_pct);
                quote += remaining;
                base += remaining / penalty_price;
            }
            Side::Sell => {
                let penalty_price = last_price * (Decimal::ONE - slippage_pct);
                base += remaining;
                quote += remaining * penalty_price;
            }
        }
    }

    if base.is_zero() {
        return Err(ArbitrageError::InsufficientLiquidity {
            required: quantity,
            available: Decimal::ZERO,
        });
    }

    Ok(FillEstimate {
        price: quote / base,
        best_price,
        filled: quantity - remaining,
        unfilled: remaining,
        levels_used,
    })
}

/// Average execution price for `quantity` on `side`.
///
/// Buys return quote spent per base received, sells return quote received
/// per base sold, so `out = in / price` for buys and `out = in * price` for
/// sells.
pub fn avg_execution_price(
    levels: &[PriceLevel],
    side: Side,
    quantity: Decimal,
    slippage_pct: Decimal,
) -> Result<Decimal, ArbitrageError> {
    estimate_fill(levels, side, quantity, slippage_pct).map(|f| f.price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn asks() -> Vec<PriceLevel> {
        vec![
            PriceLevel::new(dec!(100), dec!(1)),
            PriceLevel::new(dec!(101), dec!(1)),
            PriceLevel::new(dec!(102), dec!(2)),
        ]
    }

    fn bids() -> Vec<PriceLevel> {
        vec![
            PriceLevel::new(dec!(99), dec!(1)),
            PriceLevel::new(dec!(98), dec!(1)),
            PriceLevel::new(dec!(97), dec!(2)),
        ]
    }

    #[test]
    fn buy_within_first_level_pays_best() {
        let fill = estimate_fill(&asks(), Side::Buy, dec!(50), dec!(0.001)).unwrap();
        assert_eq!(fill.price, dec!(100));
        assert_eq!(fill.unfilled, Decimal::ZERO);
        assert_eq!(fill.levels_used, 1);
        assert_eq!(fill.slippage(), Decimal::ZERO);
    }

    #[test]
    fn buy_walks_levels_by_notional() {
        // 100 quote at 100 buys 1, 101 quote at 101 buys 1.
        let price = avg_execution_price(&asks(), Side::Buy, dec!(201), dec!(0.001)).unwrap();
        assert_eq!(price, dec!(100.5));
    }

    #[test]
    fn sell_walks_levels_by_quantity() {
        // 1 @ 99 + 1 @ 98 + 0.5 @ 97
        let price = avg_execution_price(&bids(), Side::Sell, dec!(2.5), dec!(0.001)).unwrap();
        assert_eq!(price, dec!(245.5) / dec!(2.5));
    }

    #[test]
    fn sell_remainder_priced_below_last_level() {
        let fill = estimate_fill(&bids(), Side::Sell, dec!(5), dec!(0.01)).unwrap();
        // 99 + 98 + 194 + 1 @ 97 * 0.99
        let expected = (dec!(391) + dec!(96.03)) / dec!(5);
        assert_eq!(fill.price, expected);
        assert_eq!(fill.unfilled, dec!(1));
        assert!(fill.price < dec!(97.8));
    }

    #[test]
    fn buy_remainder_priced_above_last_level() {
        let depth: Decimal = asks().iter().map(PriceLevel::notional).sum();
        let fill = estimate_fill(&asks(), Side::Buy, depth + dec!(103.02), dec!(0.01)).unwrap();
        assert_eq!(fill.unfilled, dec!(103.02));
        // Remainder buys exactly 1 at 102 * 1.01.
        assert_eq!(fill.price, (depth + dec!(103.02)) / dec!(5));
    }

    #[test]
    fn price_is_monotonic_in_quantity() {
        let quantities = [dec!(10), dec!(100), dec!(150), dec!(300), dec!(500), dec!(5000)];
        let mut last_buy = Decimal::ZERO;
        for q in quantities {
            let p = avg_execution_price(&asks(), Side::Buy, q, dec!(0.001)).unwrap();
            assert!(p >= last_buy, "buy price fell at {q}: {p} < {last_buy}");
            last_buy = p;
        }

        let mut last_sell = Decimal::MAX;
        for q in [dec!(0.1), dec!(1), dec!(1.5), dec!(3), dec!(4), dec!(40)] {
            let p = avg_execution_price(&bids(), Side::Sell, q, dec!(0.001)).unwrap();
            assert!(p <= last_sell, "sell price rose at {q}: {p} > {last_sell}");
            last_sell = p;
        }
    }

    #[test]
    fn empty_levels_is_insufficient_liquidity() {
        let result = avg_execution_price(&[], Side::Buy, dec!(10), dec!(0.001));
        assert!(matches!(
            result,
            Err(ArbitrageError::InsufficientLiquidity { .. })
        ));
    }

    #[test]
    fn non_positive_quantity_is_invalid() {
        let result = avg_execution_price(&asks(), Side::Sell, dec!(0), dec!(0.001));
        assert!(matches!(result, Err(ArbitrageError::InvalidSize(_))));
    }

    #[test]
    fn convert_matches_side_convention() {
        let fill = estimate_fill(&asks(), Side::Buy, dec!(50), dec!(0.001)).unwrap();
        assert_eq!(fill.convert(Side::Buy, dec!(50)), dec!(0.5));
        let fill = estimate_fill(&bids(), Side::Sell, dec!(1), dec!(0.001)).unwrap();
        assert_eq!(fill.convert(Side::Sell, dec!(1)), dec!(99));
    }
}
