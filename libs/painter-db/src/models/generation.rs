use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Credits charged per generation request.
pub const GENERATION_COST: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Succeeded,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Succeeded => "succeeded",
            GenerationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Generation {
    pub id: i64,
    pub account_id: i64,
    pub prompt: String,
    pub model: String,
    pub size: String,
    pub status: GenerationStatus,
    /// Net credit movement for this record: -1 while charged, 0 once refunded.
    pub credit_delta: i32,
    pub image_url: Option<String>,
    pub image_b64: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub prompt: String,
    pub model: String,
    pub size: String,
}

/// Image returned by the provider. At least one field is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub image_url: Option<String>,
    pub image_b64: Option<String>,
}
