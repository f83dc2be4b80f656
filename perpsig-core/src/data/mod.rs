//! Market data access: the provider port, an in-memory store, snapshots.

pub mod memory;
pub mod provider;
pub mod snapshot;

pub use memory::InMemoryMarketData;
pub use provider::{DataError, MarketData};
pub use snapshot::MarketSnapshot;
