//! Coarse market-condition labels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Market regime of a symbol's primary timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Trending,
    HighVolatility,
    LowVolatility,
    Choppy,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Trending => "trending",
            Regime::HighVolatility => "high_volatility",
            Regime::LowVolatility => "low_volatility",
            Regime::Choppy => "choppy",
        }
    }

    /// New entries are only taken in trending or high-volatility regimes.
    pub fn is_tradeable(&self) -> bool {
        matches!(self, Regime::Trending | Regime::HighVolatility)
    }

    /// Ranging conditions: the market has lost its directional structure.
    pub fn is_ranging(&self) -> bool {
        matches!(self, Regime::Choppy | Regime::LowVolatility)
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tradeable_regimes() {
        assert!(Regime::Trending.is_tradeable());
        assert!(Regime::HighVolatility.is_tradeable());
        assert!(!Regime::Choppy.is_tradeable());
        assert!(!Regime::LowVolatility.is_tradeable());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Regime::HighVolatility).unwrap();
        assert_eq!(json, "\"high_volatility\"");
    }
}
