use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Flow not found: {id}")]
    NotFound { id: String },

    #[error("Flow {flow_id} has no node {node_id}")]
    MissingNode { flow_id: String, node_id: String },

    #[error("Flow {flow_id} start node {node_id} is not in nodes")]
    MissingStart { flow_id: String, node_id: String },

    #[error("Flow {flow_id} is structurally invalid: {reason}")]
    Invalid { flow_id: String, reason: String },

    #[error("Flow {flow_id} exceeded {limit} chained node executions")]
    ExecutionDepth { flow_id: String, limit: usize },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Context error: {0}")]
    Context(#[from] omnihub_context::ContextError),
}

pub type Result<T> = std::result::Result<T, FlowError>;
