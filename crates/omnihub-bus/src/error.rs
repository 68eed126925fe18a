use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is shut down")]
    Closed,

    #[error("subscription group '{group}' is already consuming '{subject}'")]
    GroupActive { subject: String, group: String },

    #[error("publish failed on '{subject}': {reason}")]
    Publish { subject: String, reason: String },

    #[error("handler error: {0}")]
    Handler(String),
}

pub type Result<T> = std::result::Result<T, BusError>;
