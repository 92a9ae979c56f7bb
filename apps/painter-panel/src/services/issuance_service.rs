use crate::auth::Caller;
use crate::error::AppError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use painter_db::models::{Code, CodeKind, NewCode, normalize_code};
use painter_db::{CodeStore, LedgerError, LedgerStore};
use rand::Rng;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const MAX_CODES_PER_BATCH: u32 = 500;
const MAX_ATTEMPTS_PER_CODE: usize = 8;
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

type CodeGenerator = Arc<dyn Fn(CodeKind) -> String + Send + Sync>;

#[derive(Debug, Clone, Deserialize)]
pub struct IssueCodesRequest {
    pub kind: CodeKind,
    pub count: u32,
    #[serde(default)]
    pub value: Option<i32>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Draws a fresh identifier of the length used for `kind`.
pub fn generate_code(kind: CodeKind) -> String {
    let mut rng = rand::rng();
    (0..kind.code_len())
        .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date, which
/// expires at the end of that day.
pub fn parse_expiry(input: &str) -> Result<DateTime<Utc>, AppError> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| AppError::invalid(format!("unrecognised expiry '{}'", input)))
}

fn future_expiry(input: Option<&str>, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, AppError> {
    let expires_at = input.map(parse_expiry).transpose()?;
    if expires_at.is_some_and(|at| at <= now) {
        return Err(AppError::invalid("expires_at must be in the future"));
    }
    Ok(expires_at)
}

fn exhausted(kind: CodeKind) -> AppError {
    AppError::Internal(anyhow::anyhow!(
        "Could not allocate a unique {} code after {} attempts",
        kind,
        MAX_ATTEMPTS_PER_CODE
    ))
}

pub struct IssuanceService {
    store: Arc<dyn LedgerStore>,
    generator: CodeGenerator,
}

impl IssuanceService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            generator: Arc::new(generate_code),
        }
    }

    #[cfg(test)]
    fn with_generator(store: Arc<dyn LedgerStore>, generator: CodeGenerator) -> Self {
        Self { store, generator }
    }

    pub async fn issue_codes(&self, caller: &Caller, req: IssueCodesRequest) -> Result<Vec<Code>, AppError> {
        caller.require_admin()?;
        if !(1..=MAX_CODES_PER_BATCH).contains(&req.count) {
            return Err(AppError::invalid(format!(
                "count must be between 1 and {}",
                MAX_CODES_PER_BATCH
            )));
        }

        let template = NewCode {
            code: String::new(),
            kind: req.kind,
            value: req.value,
            expires_at: future_expiry(req.expires_at.as_deref(), Utc::now())?,
            created_by: Some(caller.account_id),
        };
        template.validate()?;

        let issued = self.mint(&template, req.count).await?;
        info!(
            admin = caller.account_id,
            kind = %req.kind,
            count = issued.len(),
            value = ?req.value,
            "Issued codes"
        );
        Ok(issued)
    }

    /// Any account may mint invites of its own for people it wants to bring in.
    pub async fn issue_own_invite(&self, caller: &Caller, expires_at: Option<&str>) -> Result<Code, AppError> {
        let template = NewCode {
            code: String::new(),
            kind: CodeKind::Invite,
            value: None,
            expires_at: future_expiry(expires_at, Utc::now())?,
            created_by: Some(caller.account_id),
        };
        let invite = self
            .mint(&template, 1)
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Invite batch came back empty")))?;
        info!(account_id = caller.account_id, code_id = invite.id, "Issued own invite");
        Ok(invite)
    }

    /// Draws `count` identifiers and stores them as one batch. A taken
    /// identifier is redrawn and the whole batch retried.
    async fn mint(&self, template: &NewCode, count: u32) -> Result<Vec<Code>, AppError> {
        let mut drawn = HashSet::new();
        let mut batch = Vec::with_capacity(count as usize);
        for _ in 0..count {
            batch.push(NewCode {
                code: self.draw(template.kind, &mut drawn)?,
                ..template.clone()
            });
        }

        for attempt in 1..=MAX_ATTEMPTS_PER_CODE {
            match self.store.insert_codes(batch.clone()).await {
                Ok(codes) => return Ok(codes),
                Err(LedgerError::CodeTaken(taken)) => {
                    debug!(attempt, "Code identifier {} already taken, drawing again", taken);
                    if let Some(slot) = batch.iter_mut().find(|c| c.code == taken) {
                        slot.code = self.draw(template.kind, &mut drawn)?;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(exhausted(template.kind))
    }

    /// Next identifier not yet drawn for this batch.
    fn draw(&self, kind: CodeKind, drawn: &mut HashSet<String>) -> Result<String, AppError> {
        for attempt in 1..=MAX_ATTEMPTS_PER_CODE {
            let candidate = normalize_code(&(self.generator)(kind));
            if drawn.insert(candidate.clone()) {
                return Ok(candidate);
            }
            debug!(attempt, "Code identifier drawn twice, drawing again");
        }
        Err(exhausted(kind))
    }

    pub async fn list_codes(&self, caller: &Caller, kind: Option<CodeKind>) -> Result<Vec<Code>, AppError> {
        caller.require_admin()?;
        Ok(self.store.list_codes(kind, None, Utc::now()).await?)
    }

    /// Invites the caller minted, newest first.
    pub async fn list_own_invites(&self, caller: &Caller) -> Result<Vec<Code>, AppError> {
        Ok(self
            .store
            .list_codes(Some(CodeKind::Invite), Some(caller.account_id), Utc::now())
            .await?)
    }
}
