use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::position::TpLevel;

/// What closed a slice of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "level", rename_all = "snake_case")]
pub enum FillKind {
    /// A take-profit level traded through.
    TakeProfit(TpLevel),
    /// Early exit at the current price after a reversal just short of a level.
    NearTakeProfit(TpLevel),
    /// Adaptive protection: the armed slice at its level, or the remainder on a re-armed trigger.
    Protection,
    StopLoss,
    /// End of backtest or manual close.
    Forced,
}

/// One exit fill against a position.
///
/// `percent` is a share of the ORIGINAL position size, so the fills of a
/// closed position always sum to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub timestamp: DateTime<Utc>,
    pub kind: FillKind,
    /// Execution price after slippage.
    pub price: f64,
    pub percent: f64,
    pub contracts: f64,
    /// Net of the exit fee.
    pub pnl: f64,
    pub fee: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fill_kind_serde_tagged() {
        let json = serde_json::to_string(&FillKind::TakeProfit(TpLevel::Tp2)).unwrap();
        assert_eq!(json, r#"{"kind":"take_profit","level":"tp2"}"#);
        let json = serde_json::to_string(&FillKind::StopLoss).unwrap();
        assert_eq!(json, r#"{"kind":"stop_loss"}"#);
    }

    #[test]
    fn fill_serde_roundtrip() {
        let fill = Fill {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 0, 5, 0).unwrap(),
            kind: FillKind::NearTakeProfit(TpLevel::Tp1),
            price: 102.5,
            percent: 50.0,
            contracts: 5.0,
            pnl: 12.3,
            fee: 0.28,
        };
        let json = serde_json::to_string(&fill).unwrap();
        let back: Fill = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fill);
    }
}
