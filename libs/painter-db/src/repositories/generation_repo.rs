use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use super::{PgStore, current_balance, insert_entry};
use crate::error::{LedgerError, Result};
use crate::models::{
    Artifact, CreditEntry, CreditReason, EntryDraft, GENERATION_COST, Generation, NewGeneration,
};
use crate::store::GenerationStore;

/// Explains why a `WHERE status = 'pending'` update matched nothing.
async fn not_pending(conn: &mut PgConnection, id: i64) -> Result<LedgerError> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM generations WHERE id = $1)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(if exists {
        LedgerError::GenerationFinalized(id)
    } else {
        LedgerError::GenerationNotFound(id)
    })
}

#[async_trait]
impl GenerationStore for PgStore {
    async fn begin_generation(
        &self,
        account_id: i64,
        generation: NewGeneration,
        now: DateTime<Utc>,
    ) -> Result<Generation> {
        let mut tx = self.pool.begin().await?;

        let debited = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE accounts SET credit_balance = credit_balance - $2
            WHERE id = $1 AND credit_balance >= $2
            RETURNING credit_balance
            "#,
        )
        .bind(account_id)
        .bind(GENERATION_COST)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = debited else {
            return Err(match current_balance(&mut tx, account_id).await? {
                Some(balance) => LedgerError::InsufficientCredit {
                    balance,
                    required: GENERATION_COST,
                },
                None => LedgerError::AccountNotFound,
            });
        };

        let record = sqlx::query_as::<_, Generation>(
            r#"
            INSERT INTO generations (account_id, prompt, model, size, status, credit_delta, created_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(&generation.prompt)
        .bind(&generation.model)
        .bind(&generation.size)
        .bind(-GENERATION_COST)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        insert_entry(
            &mut tx,
            EntryDraft {
                account_id,
                delta: -GENERATION_COST,
                balance_after: balance,
                reason: CreditReason::GenerationDebit,
                code_id: None,
                generation_id: Some(record.id),
                at: now,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn complete_generation(
        &self,
        id: i64,
        artifact: Artifact,
        now: DateTime<Utc>,
    ) -> Result<Generation> {
        let mut conn = self.pool.acquire().await?;
        let completed = sqlx::query_as::<_, Generation>(
            r#"
            UPDATE generations
            SET status = 'succeeded', image_url = $2, image_b64 = $3, completed_at = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&artifact.image_url)
        .bind(&artifact.image_b64)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        match completed {
            Some(generation) => Ok(generation),
            None => Err(not_pending(&mut conn, id).await?),
        }
    }

    async fn fail_generation(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<Generation> {
        let mut tx = self.pool.begin().await?;
        let failed = sqlx::query_as::<_, Generation>(
            r#"
            UPDATE generations
            SET status = 'failed', error_message = $2, completed_at = $3, credit_delta = credit_delta + $4
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(now)
        .bind(GENERATION_COST)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(failed) = failed else {
            return Err(not_pending(&mut tx, id).await?);
        };

        let balance = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE accounts SET credit_balance = credit_balance + $2
            WHERE id = $1 AND credit_balance::BIGINT + $2 <= 2147483647
            RETURNING credit_balance
            "#,
        )
        .bind(failed.account_id)
        .bind(GENERATION_COST)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(LedgerError::balance_overflow)?;

        insert_entry(
            &mut tx,
            EntryDraft {
                account_id: failed.account_id,
                delta: GENERATION_COST,
                balance_after: balance,
                reason: CreditReason::GenerationRefund,
                code_id: None,
                generation_id: Some(id),
                at: now,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(failed)
    }

    async fn fetch_generation(&self, id: i64) -> Result<Generation> {
        sqlx::query_as::<_, Generation>("SELECT * FROM generations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::GenerationNotFound(id))
    }

    async fn generation_history(
        &self,
        account_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<Generation>, i64)> {
        let page = sqlx::query_as::<_, Generation>(
            r#"
            SELECT * FROM generations
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit.max(0))
        .bind(skip.max(0))
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM generations WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((page, total))
    }

    async fn stale_generations(&self, before: DateTime<Utc>) -> Result<Vec<Generation>> {
        let stale = sqlx::query_as::<_, Generation>(
            "SELECT * FROM generations WHERE status = 'pending' AND created_at < $1 ORDER BY created_at ASC",
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        Ok(stale)
    }

    async fn generation_entries(&self, generation_id: i64) -> Result<Vec<CreditEntry>> {
        let entries =
            sqlx::query_as::<_, CreditEntry>("SELECT * FROM credit_entries WHERE generation_id = $1 ORDER BY id ASC")
                .bind(generation_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(entries)
    }
}
