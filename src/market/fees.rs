//! Trading fee rates.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Source of per-symbol fee rates.
pub trait FeeSource: Send + Sync {
    /// Fee rate as a fraction (0.001 = 0.1%).
    fn fee_rate(&self, symbol: &str, is_maker: bool) -> Decimal;

    /// Taker rate, which is what market orders pay.
    fn taker_fee(&self, symbol: &str) -> Decimal {
        self.fee_rate(symbol, false)
    }
}

/// Maker/taker rates per VIP tier, 0 through 9.
const VIP_SCHEDULE: [(Decimal, Decimal); 10] = [
    (dec!(0.0010), dec!(0.0010)),
    (dec!(0.0009), dec!(0.0010)),
    (dec!(0.0008), dec!(0.0010)),
    (dec!(0.0007), dec!(0.0010)),
    (dec!(0.0007), dec!(0.0009)),
    (dec!(0.0006), dec!(0.0008)),
    (dec!(0.0005), dec!(0.0007)),
    (dec!(0.0004), dec!(0.0006)),
    (dec!(0.0003), dec!(0.0005)),
    (dec!(0.0002), dec!(0.0004)),
];

const FEE_TOKEN_DISCOUNT: Decimal = dec!(0.75);

/// Static fee table with per-symbol overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeTable {
    /// Default maker rate.
    pub maker: Decimal,
    /// Default taker rate.
    pub taker: Decimal,
    overrides: HashMap<String, (Decimal, Decimal)>,
}

impl Default for FeeTable {
    fn default() -> Self {
        Self::flat(dec!(0.001), dec!(0.001))
    }
}

impl FeeTable {
    /// Same maker/taker rates for every symbol.
    pub fn flat(maker: Decimal, taker: Decimal) -> Self {
        Self {
            maker,
            taker,
            overrides: HashMap::new(),
        }
    }

    /// Rates from the VIP schedule. Tiers above 9 use tier 9.
    pub fn vip(tier: u8, fee_token_discount: bool) -> Self {
        let idx = usize::from(tier).min(VIP_SCHEDULE.len() - 1);
        let (mut maker, mut taker) = VIP_SCHEDULE[idx];
        if fee_token_discount {
            maker *= FEE_TOKEN_DISCOUNT;
            taker *= FEE_TOKEN_DISCOUNT;
        }
        Self::flat(maker, taker)
    }

    /// Override rates for one symbol.
    pub fn with_override(mut self, symbol: impl Into<String>, maker: Decimal, taker: Decimal) -> Self {
        self.overrides.insert(symbol.into(), (maker, taker));
        self
    }
}

impl FeeSource for FeeTable {
    fn fee_rate(&self, symbol: &str, is_maker: bool) -> Decimal {
        let (maker, taker) = self
            .overrides
            .get(symbol)
            .copied()
            .unwrap_or((self.maker, self.taker));
        if is_maker {
            maker
        } else {
            taker
        }
    }
}

/// Compounded taker fee fraction across `symbols`: `1 - Π(1 - fee)`.
pub fn route_fee_fraction<'a>(fees: &dyn FeeSource, symbols: impl IntoIterator<Item = &'a str>) -> Decimal {
    let kept = symbols
        .into_iter()
        .fold(Decimal::ONE, |acc, s| acc * (Decimal::ONE - fees.taker_fee(s)));
    Decimal::ONE - kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_ten_bps() {
        let table = FeeTable::default();
        assert_eq!(table.fee_rate("BTCUSDT", false), dec!(0.001));
        assert_eq!(table.fee_rate("BTCUSDT", true), dec!(0.001));
    }

    #[test]
    fn overrides_apply_per_symbol() {
        let table = FeeTable::default().with_override("ETHBTC", dec!(0), dec!(0.0005));
        assert_eq!(table.taker_fee("ETHBTC"), dec!(0.0005));
        assert_eq!(table.fee_rate("ETHBTC", true), dec!(0));
        assert_eq!(table.taker_fee("BTCUSDT"), dec!(0.001));
    }

    #[test]
    fn vip_schedule_and_discount() {
        let tier4 = FeeTable::vip(4, false);
        assert_eq!(tier4.maker, dec!(0.0007));
        assert_eq!(tier4.taker, dec!(0.0009));

        let tier0 = FeeTable::vip(0, true);
        assert_eq!(tier0.taker, dec!(0.00075));

        assert_eq!(FeeTable::vip(42, false), FeeTable::vip(9, false));
    }

    #[test]
    fn route_fee_compounds() {
        let table = FeeTable::default();
        let fraction = route_fee_fraction(&table, ["BTCUSDT", "ETHBTC", "ETHUSDT"]);
        // 1 - 0.999^3
        assert_eq!(fraction, dec!(0.002997001));
    }
}
