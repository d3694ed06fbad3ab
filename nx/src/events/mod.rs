//! Event system: typed events over a broadcast bus

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_HISTORY_CAPACITY, EventBus, EventScope, create_event_bus};
pub use types::{Event, EventKind};
