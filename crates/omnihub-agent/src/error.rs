use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Knowledge store error: {0}")]
    Knowledge(String),

    #[error("Context error: {0}")]
    Context(#[from] omnihub_context::ContextError),

    #[error("Flow error: {0}")]
    Flow(#[from] omnihub_flow::FlowError),

    #[error("Visual render error: {0}")]
    Render(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;
