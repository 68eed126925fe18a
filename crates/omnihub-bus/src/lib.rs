pub mod bus;
pub mod dedup;
pub mod error;
pub mod memory;
pub mod subjects;

pub use bus::{BusEvent, EventHandler, MessageBus, MessageHandler, StatusHandler};
pub use dedup::MessageDeduplicator;
pub use error::{BusError, Result};
pub use memory::InMemoryBus;
