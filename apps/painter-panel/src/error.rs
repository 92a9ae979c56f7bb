use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use painter_db::LedgerError;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Admin role required")]
    Unauthorized,

    #[error("Image provider failed for generation {generation_id}: {reason}")]
    ProviderFailure { generation_id: i64, reason: String },

    #[error("Image provider timed out after {after:?} for generation {generation_id}")]
    ProviderTimeout { generation_id: i64, after: Duration },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AppError::Ledger(LedgerError::InvalidRequest(message.into()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Ledger(e) => e.kind(),
            AppError::Unauthenticated => "unauthenticated",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::Unauthorized => "unauthorized",
            AppError::ProviderFailure { .. } => "provider_failure",
            AppError::ProviderTimeout { .. } => "provider_timeout",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Ledger(e) => match e {
                LedgerError::CodeNotFound
                | LedgerError::AccountNotFound
                | LedgerError::GenerationNotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::CodeAlreadyUsed
                | LedgerError::CodeExpired
                | LedgerError::InviteRequired
                | LedgerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                LedgerError::InsufficientCredit { .. } => StatusCode::PAYMENT_REQUIRED,
                LedgerError::AccountInactive => StatusCode::FORBIDDEN,
                LedgerError::UsernameTaken
                | LedgerError::CodeTaken(_)
                | LedgerError::GenerationFinalized(_) => StatusCode::CONFLICT,
                LedgerError::Decode(_) | LedgerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Unauthenticated | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Unauthorized => StatusCode::FORBIDDEN,
            AppError::ProviderFailure { .. } => StatusCode::BAD_GATEWAY,
            AppError::ProviderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{}", self);
        } else {
            tracing::debug!(kind = self.kind(), "{}", self);
        }

        let message = match &self {
            // Storage details stay in the log.
            AppError::Ledger(LedgerError::Database(_) | LedgerError::Decode(_)) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": self.kind(), "message": message }))).into_response()
    }
}
