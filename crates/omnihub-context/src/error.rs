use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Context not found for conversation {id}")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, ContextError>;
