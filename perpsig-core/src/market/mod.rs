//! Market analysis: structure, regime, market-wide bias.

pub mod btc;
pub mod regime;
pub mod structure;

pub use btc::{MarketAdjustment, MarketBias, MarketRegimeFilter};
pub use regime::{RegimeDetector, RegimeReading};
pub use structure::Trend;
