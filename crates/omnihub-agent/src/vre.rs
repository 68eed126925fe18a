//! Visual Response Engine seam. The renderer itself is an external
//! collaborator; the orchestrator only consumes this interface.

use async_trait::async_trait;

use omnihub_core::types::ChannelType;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub tenant_id: String,
    pub template_id: String,
    pub data: serde_json::Value,
    pub channel: ChannelType,
}

#[derive(Debug, Clone)]
pub struct RenderedVisual {
    pub image_url: String,
    pub caption: Option<String>,
}

#[async_trait]
pub trait VisualRenderer: Send + Sync {
    async fn render(&self, req: &RenderRequest) -> Result<RenderedVisual>;
}
