use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Channel error: {0}")]
    Channel(#[from] omnihub_channels::ChannelError),

    #[error("Bus error: {0}")]
    Bus(#[from] omnihub_bus::BusError),

    #[error("Import job not found: {id}")]
    JobNotFound { id: String },

    #[error("Import source error: {0}")]
    Source(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
