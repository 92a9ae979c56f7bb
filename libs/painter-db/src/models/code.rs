use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum CodeKind {
    /// Grants a fixed amount of credit.
    Redemption,
    /// Grants permission to create an account.
    Invite,
}

impl CodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeKind::Redemption => "redemption",
            CodeKind::Invite => "invite",
        }
    }

    /// Identifier length used when minting codes of this kind.
    pub fn code_len(&self) -> usize {
        match self {
            CodeKind::Redemption => 12,
            CodeKind::Invite => 8,
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redemption" => Ok(CodeKind::Redemption),
            "invite" => Ok(CodeKind::Invite),
            other => Err(LedgerError::Decode(format!("unknown code kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum CodeStatus {
    Unused,
    Used,
    Expired,
}

impl CodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeStatus::Unused => "unused",
            CodeStatus::Used => "used",
            CodeStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Code {
    pub id: i64,
    pub code: String,
    pub kind: CodeKind,
    /// Credit amount; only set for redemption codes.
    pub value: Option<i32>,
    pub status: CodeStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_by: Option<i64>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Code {
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Status as seen at `now`. An unused code past its expiry reads as expired
    /// whatever the stored column says.
    pub fn effective_status(&self, now: DateTime<Utc>) -> CodeStatus {
        match self.status {
            CodeStatus::Unused if self.is_past_expiry(now) => CodeStatus::Expired,
            status => status,
        }
    }

    /// Copy of the code with `status` replaced by its effective status.
    pub fn as_of(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.effective_status(now);
        self
    }

    /// Fails with the reason this code cannot be consumed at `now`.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> Result<()> {
        match self.effective_status(now) {
            CodeStatus::Unused => Ok(()),
            CodeStatus::Used => Err(LedgerError::CodeAlreadyUsed),
            CodeStatus::Expired => Err(LedgerError::CodeExpired),
        }
    }
}

/// Normalised form under which codes are stored and looked up.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone)]
pub struct NewCode {
    pub code: String,
    pub kind: CodeKind,
    pub value: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<i64>,
}

impl NewCode {
    pub fn validate(&self) -> Result<()> {
        match (self.kind, self.value) {
            (CodeKind::Redemption, Some(v)) if v > 0 => Ok(()),
            (CodeKind::Redemption, Some(_)) => Err(LedgerError::InvalidRequest(
                "redemption value must be a positive integer".to_string(),
            )),
            (CodeKind::Redemption, None) => Err(LedgerError::InvalidRequest(
                "redemption codes require a value".to_string(),
            )),
            (CodeKind::Invite, None) => Ok(()),
            (CodeKind::Invite, Some(_)) => Err(LedgerError::InvalidRequest(
                "invite codes do not carry a value".to_string(),
            )),
        }
    }
}

/// Outcome of applying a redemption code to an account.
#[derive(Debug, Clone, Serialize)]
pub struct Redemption {
    pub code: Code,
    pub points_added: i32,
    pub balance: i32,
}
