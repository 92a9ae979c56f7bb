use crate::AppState;
use crate::auth::auth_middleware;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod admin;
pub mod auth;
pub mod generation;
pub mod health;
pub mod users;

#[derive(Debug, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_page_limit")]
    pub limit: i64,
}

fn default_page_limit() -> i64 {
    50
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/users/redeem", post(users::redeem))
        .route("/api/users/ledger", get(users::ledger))
        .route("/api/users/invites", post(users::issue_invite).get(users::list_invites))
        .route("/api/generation/generate", post(generation::generate))
        .route("/api/generation/history", get(generation::history))
        .route("/api/admin/codes", post(admin::issue_codes).get(admin::list_codes))
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users/{id}/active", post(admin::set_active))
        .route("/api/admin/users/{id}/balance", post(admin::adjust_balance))
        .route("/api/admin/stats", get(admin::stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/invites/{code}", get(auth::check_invite))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
