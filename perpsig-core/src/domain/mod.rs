//! Domain types for perpsig

pub mod candle;
pub mod fill;
pub mod ids;
pub mod position;
pub mod regime;
pub mod trade;

pub use candle::{Candle, Timeframe, TimeframeParseError};
pub use fill::{Fill, FillKind};
pub use ids::PositionId;
pub use position::{
    Direction, OpenRequest, Position, PositionError, PositionState, ProtectionMark, TakeProfit,
    TakeProfitLadder, TpLevel, PERCENT_EPSILON,
};
pub use regime::Regime;
pub use trade::{ExitReason, Trade};

/// Symbol type alias
pub type Symbol = String;
