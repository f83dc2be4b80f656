use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::position::Direction;

/// Position identifier: `{symbol}_{direction}_{unix_seconds}`.
///
/// Unique because at most one position per symbol is open at a time and a
/// symbol cannot reopen within the same second it opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub String);

impl PositionId {
    pub fn new(symbol: &str, direction: Direction, opened_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{symbol}_{}_{}",
            direction.as_str(),
            opened_at.timestamp()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn position_id_format() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let id = PositionId::new("BTCUSDT", Direction::Long, t);
        assert_eq!(id.as_str(), format!("BTCUSDT_long_{}", t.timestamp()));
    }

    #[test]
    fn position_id_differs_by_direction() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_ne!(
            PositionId::new("ETHUSDT", Direction::Long, t),
            PositionId::new("ETHUSDT", Direction::Short, t)
        );
    }
}
