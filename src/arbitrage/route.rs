//! Cyclic trading routes.

use std::fmt;

use serde::Serialize;

use crate::error::ArbitrageError;

/// Ordered asset cycle, e.g. `USDT -> BTC -> ETH -> USDT`.
///
/// Always at least three assets long, starting and ending on the same asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Route(Vec<String>);

impl Route {
    /// Build a route, checking its shape.
    pub fn new<I, S>(assets: I) -> Result<Self, ArbitrageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let assets: Vec<String> = assets.into_iter().map(Into::into).collect();
        if assets.len() < 3 {
            return Err(ArbitrageError::InvalidRoute(format!(
                "need at least 3 assets, got {}",
                assets.len()
            )));
        }
        if assets.iter().any(|a| a.is_empty()) {
            return Err(ArbitrageError::InvalidRoute("empty asset name".into()));
        }
        if assets.first() != assets.last() {
            return Err(ArbitrageError::InvalidRoute(format!(
                "{} does not return to {}",
                assets.join(" -> "),
                assets[0]
            )));
        }
        Ok(Self(assets))
    }

    /// Cycle `base -> intermediates... -> base`.
    pub fn cycle(base: &str, intermediates: &[&str]) -> Result<Self, ArbitrageError> {
        let mut assets = Vec::with_capacity(intermediates.len() + 2);
        assets.push(base);
        assets.extend_from_slice(intermediates);
        assets.push(base);
        Self::new(assets)
    }

    /// Assets in order, base included at both ends.
    pub fn assets(&self) -> &[String] {
        &self.0
    }

    /// Start and end asset.
    pub fn base(&self) -> &str {
        &self.0[0]
    }

    /// Number of trades.
    pub fn hops(&self) -> usize {
        self.0.len() - 1
    }

    /// Consecutive `(from, to)` asset pairs.
    pub fn legs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.windows(2).map(|w| (w[0].as_str(), w[1].as_str()))
    }

    /// Same cycle traversed in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().cloned().collect())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_shape_is_validated() {
        assert!(Route::new(["USDT", "BTC", "USDT"]).is_ok());
        assert!(Route::new(["USDT", "BTC"]).is_err());
        assert!(Route::new(["USDT", "BTC", "ETH"]).is_err());
        assert!(Route::new(["USDT", "", "USDT"]).is_err());
    }

    #[test]
    fn hops_and_legs() {
        let route = Route::cycle("USDT", &["BTC", "ETH"]).unwrap();
        assert_eq!(route.hops(), 3);
        assert_eq!(route.base(), "USDT");
        let legs: Vec<_> = route.legs().collect();
        assert_eq!(legs, vec![("USDT", "BTC"), ("BTC", "ETH"), ("ETH", "USDT")]);
    }

    #[test]
    fn display_and_reverse() {
        let route = Route::cycle("USDT", &["BTC", "ETH"]).unwrap();
        assert_eq!(route.to_string(), "USDT -> BTC -> ETH -> USDT");
        assert_eq!(route.reversed().to_string(), "USDT -> ETH -> BTC -> USDT");
        assert_eq!(route.reversed().reversed(), route);
    }
}
