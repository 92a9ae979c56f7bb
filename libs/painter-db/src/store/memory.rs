use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{LedgerError, Result};
use crate::models::{
    Account, Admission, Artifact, Code, CodeKind, CodeStatus, CreditEntry, CreditReason,
    EntryDraft, GENERATION_COST, Generation, GenerationStatus, LedgerStats, NewAccount, NewCode,
    NewGeneration, Redemption, apply_delta, normalize_code,
};
use crate::store::{AccountStore, CodeStore, GenerationStore};

/// Reference store kept entirely in process memory.
///
/// Every operation takes the one lock over all tables, so each trait method is
/// atomic in the same sense as a database transaction. Used when no database
/// URL is configured and as the baseline the PostgreSQL store is tested against.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    accounts: BTreeMap<i64, Account>,
    codes: HashMap<String, Code>,
    generations: BTreeMap<i64, Generation>,
    entries: Vec<CreditEntry>,
    next_account_id: i64,
    next_code_id: i64,
    next_generation_id: i64,
}

impl State {
    fn account_mut(&mut self, id: i64) -> Result<&mut Account> {
        self.accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound)
    }

    /// Sets the balance to `draft.balance_after` and journals the change.
    fn post(&mut self, draft: EntryDraft) -> Result<CreditEntry> {
        self.account_mut(draft.account_id)?.credit_balance = draft.balance_after;
        let entry = CreditEntry {
            id: self.entries.len() as i64 + 1,
            account_id: draft.account_id,
            delta: draft.delta,
            balance_after: draft.balance_after,
            reason: draft.reason,
            code_id: draft.code_id,
            generation_id: draft.generation_id,
            created_at: draft.at,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn balance(&self, account_id: i64) -> Result<i32> {
        self.accounts
            .get(&account_id)
            .map(|a| a.credit_balance)
            .ok_or(LedgerError::AccountNotFound)
    }

    /// Caller has already checked the identifier is free.
    fn store_code(&mut self, code: NewCode) -> Code {
        self.next_code_id += 1;
        let key = normalize_code(&code.code);
        let created = Code {
            id: self.next_code_id,
            code: key.clone(),
            kind: code.kind,
            value: code.value,
            status: CodeStatus::Unused,
            expires_at: code.expires_at,
            used_by: None,
            used_at: None,
            created_by: code.created_by,
            created_at: Utc::now(),
        };
        self.codes.insert(key, created.clone());
        created
    }

    /// Shared by `mark_used` and invite admission.
    fn consume_code(
        &mut self,
        code: &str,
        kind: Option<CodeKind>,
        account_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Code> {
        let stored = self
            .codes
            .get_mut(&normalize_code(code))
            .filter(|c| kind.is_none_or(|k| c.kind == k))
            .ok_or(LedgerError::CodeNotFound)?;
        stored.ensure_usable(now)?;
        stored.status = CodeStatus::Used;
        stored.used_by = Some(account_id);
        stored.used_at = Some(now);
        Ok(stored.clone())
    }

    fn finalize(
        &mut self,
        id: i64,
        status: GenerationStatus,
        now: DateTime<Utc>,
    ) -> Result<&mut Generation> {
        let generation = self
            .generations
            .get_mut(&id)
            .ok_or(LedgerError::GenerationNotFound(id))?;
        if generation.status != GenerationStatus::Pending {
            return Err(LedgerError::GenerationFinalized(id));
        }
        generation.status = status;
        generation.completed_at = Some(now);
        Ok(generation)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn fetch_account(&self, id: i64) -> Result<Account> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound)
    }

    async fn fetch_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn create_account(
        &self,
        account: NewAccount,
        admission: Admission,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut state = self.state.lock().await;
        if state.accounts.values().any(|a| a.username == account.username) {
            return Err(LedgerError::UsernameTaken);
        }
        if matches!(admission, Admission::FirstAccount) && !state.accounts.is_empty() {
            return Err(LedgerError::InviteRequired);
        }

        state.next_account_id += 1;
        let id = state.next_account_id;

        let invite_code = match &admission {
            Admission::Invite(code) => {
                // Nothing has been written yet, so a failed consume leaves no trace
                // apart from the skipped id.
                let consumed = state.consume_code(code, Some(CodeKind::Invite), id, now)?;
                Some(consumed.code)
            }
            Admission::FirstAccount | Admission::Seed => None,
        };

        let created = Account {
            id,
            username: account.username,
            password_hash: account.password_hash,
            role: account.role,
            credit_balance: 0,
            is_active: true,
            invite_code,
            created_at: now,
        };
        state.accounts.insert(id, created.clone());
        Ok(created)
    }

    async fn list_accounts(&self, skip: i64, limit: i64) -> Result<Vec<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn set_account_active(&self, id: i64, active: bool) -> Result<Account> {
        let mut state = self.state.lock().await;
        let account = state.account_mut(id)?;
        account.is_active = active;
        Ok(account.clone())
    }

    async fn adjust_balance(&self, id: i64, delta: i32, now: DateTime<Utc>) -> Result<CreditEntry> {
        let mut state = self.state.lock().await;
        let next = apply_delta(state.balance(id)?, delta)?;
        state.post(EntryDraft {
            account_id: id,
            delta,
            balance_after: next,
            reason: CreditReason::AdminAdjustment,
            code_id: None,
            generation_id: None,
            at: now,
        })
    }

    async fn credit_history(&self, account_id: i64, limit: i64) -> Result<Vec<CreditEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.account_id == account_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn ledger_stats(&self, now: DateTime<Utc>) -> Result<LedgerStats> {
        let state = self.state.lock().await;
        let (week_start, day_start) = LedgerStats::windows(now);
        let active: HashSet<i64> = state
            .generations
            .values()
            .filter(|g| g.created_at >= week_start)
            .map(|g| g.account_id)
            .collect();
        Ok(LedgerStats {
            total_accounts: state.accounts.len() as i64,
            total_generations: state.generations.len() as i64,
            credit_in_circulation: state.accounts.values().map(|a| i64::from(a.credit_balance)).sum(),
            active_accounts_7d: active.len() as i64,
            generations_today: state
                .generations
                .values()
                .filter(|g| g.created_at >= day_start)
                .count() as i64,
        })
    }
}

#[async_trait]
impl CodeStore for MemoryStore {
    async fn lookup_code(&self, code: &str, now: DateTime<Utc>) -> Result<Code> {
        let state = self.state.lock().await;
        state
            .codes
            .get(&normalize_code(code))
            .cloned()
            .map(|c| c.as_of(now))
            .ok_or(LedgerError::CodeNotFound)
    }

    async fn mark_used(&self, code: &str, account_id: i64, now: DateTime<Utc>) -> Result<Code> {
        let mut state = self.state.lock().await;
        if !state.accounts.contains_key(&account_id) {
            return Err(LedgerError::AccountNotFound);
        }
        state.consume_code(code, None, account_id, now)
    }

    async fn insert_code(&self, code: NewCode) -> Result<Option<Code>> {
        code.validate()?;
        let mut state = self.state.lock().await;
        if state.codes.contains_key(&normalize_code(&code.code)) {
            return Ok(None);
        }
        Ok(Some(state.store_code(code)))
    }

    async fn insert_codes(&self, codes: Vec<NewCode>) -> Result<Vec<Code>> {
        let mut state = self.state.lock().await;
        let mut seen = HashSet::new();
        for code in &codes {
            code.validate()?;
            let key = normalize_code(&code.code);
            if state.codes.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(LedgerError::CodeTaken(key));
            }
        }
        Ok(codes.into_iter().map(|c| state.store_code(c)).collect())
    }

    async fn list_codes(
        &self,
        kind: Option<CodeKind>,
        created_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Code>> {
        let state = self.state.lock().await;
        let mut codes: Vec<Code> = state
            .codes
            .values()
            .filter(|c| kind.is_none_or(|k| c.kind == k))
            .filter(|c| created_by.is_none_or(|id| c.created_by == Some(id)))
            .cloned()
            .map(|c| c.as_of(now))
            .collect();
        codes.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(codes)
    }

    async fn redeem(&self, code: &str, account_id: i64, now: DateTime<Utc>) -> Result<Redemption> {
        let mut state = self.state.lock().await;
        let balance = state.balance(account_id)?;

        // Settle the credit before touching the code, so a refusal leaves it unused.
        let pending = state
            .codes
            .get(&normalize_code(code))
            .filter(|c| c.kind == CodeKind::Redemption)
            .ok_or(LedgerError::CodeNotFound)?;
        pending.ensure_usable(now)?;
        let points = pending.value.unwrap_or_default();
        let next = apply_delta(balance, points)?;

        let used = state.consume_code(code, Some(CodeKind::Redemption), account_id, now)?;
        state.post(EntryDraft {
            account_id,
            delta: points,
            balance_after: next,
            reason: CreditReason::Redemption,
            code_id: Some(used.id),
            generation_id: None,
            at: now,
        })?;
        Ok(Redemption {
            code: used,
            points_added: points,
            balance: next,
        })
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn begin_generation(
        &self,
        account_id: i64,
        generation: NewGeneration,
        now: DateTime<Utc>,
    ) -> Result<Generation> {
        let mut state = self.state.lock().await;
        let balance = state.balance(account_id)?;
        let next = apply_delta(balance, -GENERATION_COST).map_err(|_| LedgerError::InsufficientCredit {
            balance,
            required: GENERATION_COST,
        })?;

        state.next_generation_id += 1;
        let record = Generation {
            id: state.next_generation_id,
            account_id,
            prompt: generation.prompt,
            model: generation.model,
            size: generation.size,
            status: GenerationStatus::Pending,
            credit_delta: -GENERATION_COST,
            image_url: None,
            image_b64: None,
            error_message: None,
            created_at: now,
            completed_at: None,
        };
        state.generations.insert(record.id, record.clone());
        state.post(EntryDraft {
            account_id,
            delta: -GENERATION_COST,
            balance_after: next,
            reason: CreditReason::GenerationDebit,
            code_id: None,
            generation_id: Some(record.id),
            at: now,
        })?;
        Ok(record)
    }

    async fn complete_generation(
        &self,
        id: i64,
        artifact: Artifact,
        now: DateTime<Utc>,
    ) -> Result<Generation> {
        let mut state = self.state.lock().await;
        let generation = state.finalize(id, GenerationStatus::Succeeded, now)?;
        generation.image_url = artifact.image_url;
        generation.image_b64 = artifact.image_b64;
        Ok(generation.clone())
    }

    async fn fail_generation(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<Generation> {
        let mut state = self.state.lock().await;
        let (account_id, status) = state
            .generations
            .get(&id)
            .map(|g| (g.account_id, g.status))
            .ok_or(LedgerError::GenerationNotFound(id))?;
        if status != GenerationStatus::Pending {
            return Err(LedgerError::GenerationFinalized(id));
        }
        let next = apply_delta(state.balance(account_id)?, GENERATION_COST)?;

        let generation = state.finalize(id, GenerationStatus::Failed, now)?;
        generation.error_message = Some(reason.to_string());
        generation.credit_delta += GENERATION_COST;
        let failed = generation.clone();

        state.post(EntryDraft {
            account_id,
            delta: GENERATION_COST,
            balance_after: next,
            reason: CreditReason::GenerationRefund,
            code_id: None,
            generation_id: Some(id),
            at: now,
        })?;
        Ok(failed)
    }

    async fn fetch_generation(&self, id: i64) -> Result<Generation> {
        let state = self.state.lock().await;
        state
            .generations
            .get(&id)
            .cloned()
            .ok_or(LedgerError::GenerationNotFound(id))
    }

    async fn generation_history(
        &self,
        account_id: i64,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<Generation>, i64)> {
        let state = self.state.lock().await;
        let owned: Vec<&Generation> = state
            .generations
            .values()
            .rev()
            .filter(|g| g.account_id == account_id)
            .collect();
        let total = owned.len() as i64;
        let page = owned
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn stale_generations(&self, before: DateTime<Utc>) -> Result<Vec<Generation>> {
        let state = self.state.lock().await;
        Ok(state
            .generations
            .values()
            .filter(|g| g.status == GenerationStatus::Pending && g.created_at < before)
            .cloned()
            .collect())
    }

    async fn generation_entries(&self, generation_id: i64) -> Result<Vec<CreditEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.generation_id == Some(generation_id))
            .cloned()
            .collect())
    }
}
