use crate::AppState;
use axum::{Json, extract::State};
use serde_json::{Value, json};

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "provider": state.generation_service.provider_name(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
