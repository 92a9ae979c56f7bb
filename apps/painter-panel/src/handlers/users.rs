use crate::AppState;
use crate::auth::Caller;
use crate::error::AppError;
use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use painter_db::models::{Code, CreditEntry};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct RedeemRequest {
    pub code: String,
}

#[derive(Serialize)]
pub struct RedeemResponse {
    pub code: String,
    pub points_added: i32,
    pub balance: i32,
}

#[derive(Deserialize)]
pub struct LedgerQuery {
    #[serde(default = "default_ledger_limit")]
    pub limit: i64,
}

fn default_ledger_limit() -> i64 {
    50
}

#[derive(Deserialize)]
pub struct OwnInviteRequest {
    #[serde(default)]
    pub expires_at: Option<String>,
}

pub async fn redeem(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, AppError> {
    let redemption = state.ledger_service.redeem(&caller, &req.code).await?;
    Ok(Json(RedeemResponse {
        code: redemption.code.code,
        points_added: redemption.points_added,
        balance: redemption.balance,
    }))
}

pub async fn ledger(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Vec<CreditEntry>>, AppError> {
    Ok(Json(state.ledger_service.credit_history(&caller, query.limit).await?))
}

pub async fn issue_invite(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<OwnInviteRequest>,
) -> Result<(StatusCode, Json<Code>), AppError> {
    let invite = state
        .issuance_service
        .issue_own_invite(&caller, req.expires_at.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(invite)))
}

pub async fn list_invites(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<Code>>, AppError> {
    Ok(Json(state.issuance_service.list_own_invites(&caller).await?))
}
