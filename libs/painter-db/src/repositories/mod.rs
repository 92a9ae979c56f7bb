use sqlx::{PgConnection, PgPool};

use crate::error::Result;
use crate::models::{CreditEntry, EntryDraft};

pub mod account_repo;
pub mod code_repo;
pub mod generation_repo;

/// PostgreSQL-backed ledger store. Every multi-row mutation runs in one
/// transaction built around a conditional `UPDATE ... RETURNING`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) async fn insert_entry(conn: &mut PgConnection, draft: EntryDraft) -> Result<CreditEntry> {
    let entry = sqlx::query_as::<_, CreditEntry>(
        r#"
        INSERT INTO credit_entries (account_id, delta, balance_after, reason, code_id, generation_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(draft.account_id)
    .bind(draft.delta)
    .bind(draft.balance_after)
    .bind(draft.reason.as_str())
    .bind(draft.code_id)
    .bind(draft.generation_id)
    .bind(draft.at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(entry)
}

/// Current balance, or `None` when the account does not exist.
pub(crate) async fn current_balance(conn: &mut PgConnection, account_id: i64) -> Result<Option<i32>> {
    let balance = sqlx::query_scalar::<_, i32>("SELECT credit_balance FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(balance)
}
