//! Position lifecycle: costs, the per-observation state machine, the book
//! of open positions, and the events it publishes.

pub mod book;
pub mod costs;
pub mod events;
pub mod machine;

pub use book::{BookError, PositionBook};
pub use costs::Costs;
pub use events::{
    notify, AdaptiveTrigger, EventSink, FanoutSink, LifecycleEvent, NullSink, RecordingSink,
    SinkError, TracingSink,
};
pub use machine::{Lifecycle, Observation, Update};
