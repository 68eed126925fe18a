pub mod coexistence;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod import;
pub mod inbound;

pub use coexistence::{CoexistenceMonitor, CoexistenceStore};
pub use directory::SqliteDirectory;
pub use dispatcher::OutboundDispatcher;
pub use error::{DispatchError, Result};
pub use import::{HistorySource, ImportJobStore, ImportRunner};
pub use inbound::InboundConsumer;
