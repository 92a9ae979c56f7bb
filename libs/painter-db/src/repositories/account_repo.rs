use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::code_repo::consume_code;
use super::{PgStore, current_balance, insert_entry};
use crate::error::{LedgerError, Result};
use crate::models::{
    Account, Admission, CodeKind, CreditEntry, CreditReason, EntryDraft, LedgerStats, NewAccount,
    apply_delta, normalize_code,
};
use crate::store::AccountStore;

#[async_trait]
impl AccountStore for PgStore {
    async fn fetch_account(&self, id: i64) -> Result<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::AccountNotFound)
    }

    async fn fetch_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn create_account(
        &self,
        account: NewAccount,
        admission: Admission,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut tx = self.pool.begin().await?;

        if matches!(admission, Admission::FirstAccount) {
            // Serialises concurrent first registrations.
            sqlx::query("LOCK TABLE accounts IN SHARE ROW EXCLUSIVE MODE")
                .execute(&mut *tx)
                .await?;
            let any = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM accounts)")
                .fetch_one(&mut *tx)
                .await?;
            if any {
                return Err(LedgerError::InviteRequired);
            }
        }

        let invite_code = match &admission {
            Admission::Invite(code) => Some(normalize_code(code)),
            Admission::FirstAccount | Admission::Seed => None,
        };

        let created = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (username, password_hash, role, invite_code, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(&invite_code)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if LedgerError::is_unique_violation(&e) {
                LedgerError::UsernameTaken
            } else {
                LedgerError::Database(e)
            }
        })?;

        if let Some(code) = &invite_code {
            consume_code(&mut tx, code, Some(CodeKind::Invite), created.id, now).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn list_accounts(&self, skip: i64, limit: i64) -> Result<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>("SELECT * FROM accounts ORDER BY id ASC LIMIT $1 OFFSET $2")
            .bind(limit.max(0))
            .bind(skip.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(accounts)
    }

    async fn set_account_active(&self, id: i64, active: bool) -> Result<Account> {
        sqlx::query_as::<_, Account>("UPDATE accounts SET is_active = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::AccountNotFound)
    }

    async fn adjust_balance(&self, id: i64, delta: i32, now: DateTime<Utc>) -> Result<CreditEntry> {
        let mut tx = self.pool.begin().await?;
        // The guard is evaluated in BIGINT before the INTEGER column is written.
        let updated = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE accounts SET credit_balance = credit_balance + $2
            WHERE id = $1 AND credit_balance::BIGINT + $2 BETWEEN 0 AND 2147483647
            RETURNING credit_balance
            "#,
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = updated else {
            let balance = current_balance(&mut tx, id)
                .await?
                .ok_or(LedgerError::AccountNotFound)?;
            return Err(match apply_delta(balance, delta) {
                Err(refused) => refused,
                // A concurrent change moved the balance back into range.
                Ok(_) => LedgerError::InsufficientCredit {
                    balance,
                    required: delta.saturating_neg(),
                },
            });
        };

        let entry = insert_entry(
            &mut tx,
            EntryDraft {
                account_id: id,
                delta,
                balance_after: balance,
                reason: CreditReason::AdminAdjustment,
                code_id: None,
                generation_id: None,
                at: now,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn credit_history(&self, account_id: i64, limit: i64) -> Result<Vec<CreditEntry>> {
        let entries = sqlx::query_as::<_, CreditEntry>(
            "SELECT * FROM credit_entries WHERE account_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(account_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn ledger_stats(&self, now: DateTime<Utc>) -> Result<LedgerStats> {
        let (week_start, day_start) = LedgerStats::windows(now);
        let (total_accounts, credit_in_circulation) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(credit_balance), 0)::BIGINT FROM accounts",
        )
        .fetch_one(&self.pool)
        .await?;

        let (total_generations, active_accounts_7d, generations_today) =
            sqlx::query_as::<_, (i64, i64, i64)>(
                r#"
                SELECT COUNT(*),
                       COUNT(DISTINCT account_id) FILTER (WHERE created_at >= $1),
                       COUNT(*) FILTER (WHERE created_at >= $2)
                FROM generations
                "#,
            )
            .bind(week_start)
            .bind(day_start)
            .fetch_one(&self.pool)
            .await?;

        Ok(LedgerStats {
            total_accounts,
            total_generations,
            credit_in_circulation,
            active_accounts_7d,
            generations_today,
        })
    }
}
