use crate::AppState;
use crate::auth::Caller;
use crate::error::AppError;
use crate::handlers::Page;
use crate::services::generation_service::{GenerationHistory, GenerationRequest};
use axum::{
    Extension, Json,
    extract::{Query, State},
};
use painter_db::models::Generation;

pub async fn generate(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<GenerationRequest>,
) -> Result<Json<Generation>, AppError> {
    Ok(Json(state.generation_service.request_generation(&caller, req).await?))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(page): Query<Page>,
) -> Result<Json<GenerationHistory>, AppError> {
    Ok(Json(
        state.generation_service.history(&caller, page.skip, page.limit).await?,
    ))
}
