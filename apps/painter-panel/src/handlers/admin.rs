use crate::AppState;
use crate::auth::Caller;
use crate::error::AppError;
use crate::handlers::Page;
use crate::services::issuance_service::IssueCodesRequest;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use painter_db::models::{Account, Code, CodeKind, CreditEntry, LedgerStats};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct CodeFilter {
    pub kind: Option<CodeKind>,
}

#[derive(Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct AdjustBalanceRequest {
    pub delta: i32,
}

pub async fn issue_codes(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<IssueCodesRequest>,
) -> Result<(StatusCode, Json<Vec<Code>>), AppError> {
    let codes = state.issuance_service.issue_codes(&caller, req).await?;
    Ok((StatusCode::CREATED, Json(codes)))
}

pub async fn list_codes(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(filter): Query<CodeFilter>,
) -> Result<Json<Vec<Code>>, AppError> {
    Ok(Json(state.issuance_service.list_codes(&caller, filter.kind).await?))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Account>>, AppError> {
    Ok(Json(
        state.account_service.list_accounts(&caller, page.skip, page.limit).await?,
    ))
}

pub async fn set_active(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<Account>, AppError> {
    Ok(Json(state.account_service.set_active(&caller, id, req.is_active).await?))
}

pub async fn adjust_balance(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<i64>,
    Json(req): Json<AdjustBalanceRequest>,
) -> Result<Json<CreditEntry>, AppError> {
    Ok(Json(state.account_service.adjust_balance(&caller, id, req.delta).await?))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<LedgerStats>, AppError> {
    Ok(Json(state.account_service.stats(&caller).await?))
}
