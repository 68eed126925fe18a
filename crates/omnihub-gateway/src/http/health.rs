use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "whatsapp": state.whatsapp.is_some(),
        "messaging_channels": state.registry.messaging_channel_types().len(),
        "voice_providers": state.registry.voice_providers().len(),
    }))
}
