use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Account, Admission, Artifact, Code, CodeKind, CreditEntry, Generation, LedgerStats, NewAccount,
    NewCode, NewGeneration, Redemption,
};

pub mod memory;

#[cfg(test)]
pub(crate) mod conformance;

pub use memory::MemoryStore;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Find account by id
    async fn fetch_account(&self, id: i64) -> Result<Account>;

    /// Find account by exact username
    async fn fetch_account_by_username(&self, username: &str) -> Result<Option<Account>>;

    /// Create an account under the given admission rule. Invite admission
    /// consumes the invite in the same atomic unit as the insert.
    async fn create_account(
        &self,
        account: NewAccount,
        admission: Admission,
        now: DateTime<Utc>,
    ) -> Result<Account>;

    async fn list_accounts(&self, skip: i64, limit: i64) -> Result<Vec<Account>>;

    async fn set_account_active(&self, id: i64, active: bool) -> Result<Account>;

    /// Apply a signed delta to the balance. Fails with InsufficientCredit
    /// instead of letting the balance go negative, and with InvalidRequest
    /// when the result would not fit.
    async fn adjust_balance(&self, id: i64, delta: i32, now: DateTime<Utc>) -> Result<CreditEntry>;

    /// Journal entries of an account, newest first
    async fn credit_history(&self, account_id: i64, limit: i64) -> Result<Vec<CreditEntry>>;

    /// Account, generation and credit totals as of `now`.
    async fn ledger_stats(&self, now: DateTime<Utc>) -> Result<LedgerStats>;
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Find a code; the returned status is the effective status at `now`.
    async fn lookup_code(&self, code: &str, now: DateTime<Utc>) -> Result<Code>;

    /// Transition unused -> used. Exactly one concurrent caller wins; the rest
    /// observe CodeAlreadyUsed.
    async fn mark_used(&self, code: &str, account_id: i64, now: DateTime<Utc>) -> Result<Code>;

    /// Insert a new code. Returns `None` when the identifier is already taken.
    async fn insert_code(&self, code: NewCode) -> Result<Option<Code>>;

    /// Insert a batch all-or-nothing. A taken identifier, in the store or
    /// twice in the batch, fails the whole batch with CodeTaken.
    async fn insert_codes(&self, codes: Vec<NewCode>) -> Result<Vec<Code>>;

    /// Codes newest first, optionally narrowed to one kind or one creator.
    async fn list_codes(
        &self,
        kind: Option<CodeKind>,
        created_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Code>>;

    /// Mark a redemption code used and credit its value to the account as one unit.
    async fn redeem(&self, code: &str, account_id: i64, now: DateTime<Utc>) -> Result<Redemption>;
}

#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Debit one credit and create a pending record as one unit.
    async fn begin_generation(
        &self,
        account_id: i64,
        generation: NewGeneration,
        now: DateTime<Utc>,
    ) -> Result<Generation>;

    /// pending -> succeeded
    async fn complete_generation(
        &self,
        id: i64,
        artifact: Artifact,
        now: DateTime<Utc>,
    ) -> Result<Generation>;

    /// pending -> failed, refunding the debit in the same unit
    async fn fail_generation(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<Generation>;

    async fn fetch_generation(&self, id: i64) -> Result<Generation>;

    /// Page of an account's generations, newest first, plus the total count.
    async fn generation_history(
        &self,
        account_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<Generation>, i64)>;

    /// Records still pending that were created before `before`.
    async fn stale_generations(&self, before: DateTime<Utc>) -> Result<Vec<Generation>>;

    /// Journal entries tied to a generation, oldest first.
    async fn generation_entries(&self, generation_id: i64) -> Result<Vec<CreditEntry>>;
}

/// Everything the ledger services need from persistence.
pub trait LedgerStore: AccountStore + CodeStore + GenerationStore {}

impl<T: AccountStore + CodeStore + GenerationStore> LedgerStore for T {}
