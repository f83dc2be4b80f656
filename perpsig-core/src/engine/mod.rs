//! Drivers around the lifecycle: the desk both loops share, the backtest
//! replay, and the live poller.

pub mod desk;
pub mod live;
pub mod replay;

pub use desk::{Desk, DeskMode, EntryError};
pub use live::{Clock, LivePoller, ManualClock, PollSummary, SystemClock};
pub use replay::{run_backtest, BacktestRun, EquityPoint, ReplayError, ReplayOptions};
