use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;

use super::{PgStore, current_balance, insert_entry};
use crate::error::{LedgerError, Result};
use crate::models::{Code, CodeKind, CreditReason, EntryDraft, NewCode, Redemption, normalize_code};
use crate::store::CodeStore;

/// Conditional unused -> used transition. When the update matches no row the
/// code is read back to report why; an eligible-looking code at that point
/// means a concurrent caller committed first.
pub(crate) async fn consume_code(
    conn: &mut PgConnection,
    code: &str,
    kind: Option<CodeKind>,
    account_id: i64,
    now: DateTime<Utc>,
) -> Result<Code> {
    let code = normalize_code(code);
    let updated = sqlx::query_as::<_, Code>(
        r#"
        UPDATE codes
        SET status = 'used', used_by = $2, used_at = $3
        WHERE code = $1
          AND status = 'unused'
          AND (expires_at IS NULL OR expires_at > $3)
          AND ($4::TEXT IS NULL OR kind = $4)
        RETURNING *
        "#,
    )
    .bind(&code)
    .bind(account_id)
    .bind(now)
    .bind(kind.map(|k| k.as_str()))
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(used) = updated {
        return Ok(used);
    }

    let stored = sqlx::query_as::<_, Code>("SELECT * FROM codes WHERE code = $1")
        .bind(&code)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::CodeNotFound)?;
    if kind.is_some_and(|k| k != stored.kind) {
        return Err(LedgerError::CodeNotFound);
    }
    stored.ensure_usable(now)?;
    debug!("Code {} lost a concurrent consume", code);
    Err(LedgerError::CodeAlreadyUsed)
}

async fn account_exists(conn: &mut PgConnection, account_id: i64) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1)")
        .bind(account_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

/// `None` when the identifier is already taken.
async fn insert_one(conn: &mut PgConnection, code: &NewCode) -> Result<Option<Code>> {
    code.validate()?;
    let inserted = sqlx::query_as::<_, Code>(
        r#"
        INSERT INTO codes (code, kind, value, expires_at, created_by)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (code) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(normalize_code(&code.code))
    .bind(code.kind.as_str())
    .bind(code.value)
    .bind(code.expires_at)
    .bind(code.created_by)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(inserted)
}

#[async_trait]
impl CodeStore for PgStore {
    async fn lookup_code(&self, code: &str, now: DateTime<Utc>) -> Result<Code> {
        let stored = sqlx::query_as::<_, Code>("SELECT * FROM codes WHERE code = $1")
            .bind(normalize_code(code))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::CodeNotFound)?;
        Ok(stored.as_of(now))
    }

    async fn mark_used(&self, code: &str, account_id: i64, now: DateTime<Utc>) -> Result<Code> {
        let mut tx = self.pool.begin().await?;
        if !account_exists(&mut tx, account_id).await? {
            return Err(LedgerError::AccountNotFound);
        }
        let used = consume_code(&mut tx, code, None, account_id, now).await?;
        tx.commit().await?;
        Ok(used)
    }

    async fn insert_code(&self, code: NewCode) -> Result<Option<Code>> {
        let mut conn = self.pool.acquire().await?;
        insert_one(&mut conn, &code).await
    }

    async fn insert_codes(&self, codes: Vec<NewCode>) -> Result<Vec<Code>> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(codes.len());
        for code in &codes {
            // Returning early drops the transaction, rolling back the batch.
            match insert_one(&mut tx, code).await? {
                Some(created) => inserted.push(created),
                None => return Err(LedgerError::CodeTaken(normalize_code(&code.code))),
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_codes(
        &self,
        kind: Option<CodeKind>,
        created_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Code>> {
        let codes = sqlx::query_as::<_, Code>(
            r#"
            SELECT * FROM codes
            WHERE ($1::TEXT IS NULL OR kind = $1)
              AND ($2::BIGINT IS NULL OR created_by = $2)
            ORDER BY id DESC
            "#,
        )
        .bind(kind.map(|k| k.as_str()))
        .bind(created_by)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes.into_iter().map(|c| c.as_of(now)).collect())
    }

    async fn redeem(&self, code: &str, account_id: i64, now: DateTime<Utc>) -> Result<Redemption> {
        let mut tx = self.pool.begin().await?;
        if current_balance(&mut tx, account_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound);
        }

        let used = consume_code(&mut tx, code, Some(CodeKind::Redemption), account_id, now).await?;
        let points = used
            .value
            .ok_or_else(|| LedgerError::Decode(format!("redemption code {} has no value", used.code)))?;

        // No row means the credit would not fit; dropping `tx` puts the code back.
        let balance = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE accounts SET credit_balance = credit_balance + $2
            WHERE id = $1 AND credit_balance::BIGINT + $2 <= 2147483647
            RETURNING credit_balance
            "#,
        )
        .bind(account_id)
        .bind(points)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(LedgerError::balance_overflow)?;

        insert_entry(
            &mut tx,
            EntryDraft {
                account_id,
                delta: points,
                balance_after: balance,
                reason: CreditReason::Redemption,
                code_id: Some(used.id),
                generation_id: None,
                at: now,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(Redemption {
            code: used,
            points_added: points,
            balance,
        })
    }
}
