use crate::AppState;
use crate::auth::Caller;
use crate::error::AppError;
use crate::services::account_service::{LoginResponse, RegisterRequest};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use painter_db::models::{Account, normalize_code};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = state.account_service.register(req).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    Ok(Json(state.account_service.login(&req.username, &req.password).await?))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Account>, AppError> {
    Ok(Json(state.account_service.me(&caller).await?))
}

pub async fn check_invite(State(state): State<AppState>, Path(code): Path<String>) -> Result<Json<Value>, AppError> {
    let valid = state.ledger_service.invite_is_valid(&code).await?;
    Ok(Json(json!({ "code": normalize_code(&code), "valid": valid })))
}
