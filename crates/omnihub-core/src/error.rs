use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signature validation failed: {0}")]
    Signature(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("Bot not found for channel {channel_id}")]
    BotNotFound { channel_id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("AI provider error: {0}")]
    AiProvider(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Short error code string used in status payloads and logs.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::Config(_) => "CONFIG_ERROR",
            HubError::Signature(_) => "SIGNATURE_INVALID",
            HubError::Channel { .. } => "CHANNEL_ERROR",
            HubError::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            HubError::BotNotFound { .. } => "BOT_NOT_FOUND",
            HubError::Database(_) => "DATABASE_ERROR",
            HubError::Bus(_) => "BUS_ERROR",
            HubError::AiProvider(_) => "AI_PROVIDER_ERROR",
            HubError::Serialization(_) => "SERIALIZATION_ERROR",
            HubError::Io(_) => "IO_ERROR",
            HubError::Timeout { .. } => "TIMEOUT",
            HubError::Cancelled => "CANCELLED",
            HubError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
