use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum CreditReason {
    Redemption,
    GenerationDebit,
    GenerationRefund,
    AdminAdjustment,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::Redemption => "redemption",
            CreditReason::GenerationDebit => "generation_debit",
            CreditReason::GenerationRefund => "generation_refund",
            CreditReason::AdminAdjustment => "admin_adjustment",
        }
    }
}

/// One balance movement. Written in the same atomic unit as the balance change.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditEntry {
    pub id: i64,
    pub account_id: i64,
    pub delta: i32,
    pub balance_after: i32,
    pub reason: CreditReason,
    pub code_id: Option<i64>,
    pub generation_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Journal row about to be written next to a balance change.
#[derive(Debug, Clone)]
pub(crate) struct EntryDraft {
    pub account_id: i64,
    pub delta: i32,
    pub balance_after: i32,
    pub reason: CreditReason,
    pub code_id: Option<i64>,
    pub generation_id: Option<i64>,
    pub at: DateTime<Utc>,
}

/// Balance after applying `delta`. Refuses results below zero and results
/// past `i32::MAX`.
pub fn apply_delta(balance: i32, delta: i32) -> Result<i32> {
    match balance.checked_add(delta) {
        Some(next) if next >= 0 => Ok(next),
        Some(_) => Err(LedgerError::InsufficientCredit {
            balance,
            required: delta.saturating_neg(),
        }),
        None => Err(LedgerError::balance_overflow()),
    }
}

/// System-wide figures for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_accounts: i64,
    pub total_generations: i64,
    /// Sum of every account balance.
    pub credit_in_circulation: i64,
    /// Accounts that requested a generation in the last seven days.
    pub active_accounts_7d: i64,
    /// Generations created since 00:00 UTC today.
    pub generations_today: i64,
}

impl LedgerStats {
    /// Start of the seven-day activity window and of the current UTC day.
    pub(crate) fn windows(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        (now - Duration::days(7), day_start)
    }
}
