use crate::auth::{Caller, TokenIssuer, hash_password, verify_password};
use crate::config::AdminCredentials;
use crate::error::AppError;
use chrono::Utc;
use painter_db::models::{Account, Admission, CreditEntry, LedgerStats, NewAccount, Role};
use painter_db::{AccountStore, LedgerError, LedgerStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=50;
const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub invite_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub account: Account,
}

pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    tokens: TokenIssuer,
    bcrypt_cost: u32,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>, tokens: TokenIssuer, bcrypt_cost: u32) -> Self {
        Self {
            store,
            tokens,
            bcrypt_cost,
        }
    }

    /// Creates an account. With an invite code the invite is consumed together
    /// with the insert; without one only the very first account may register,
    /// and it becomes the administrator.
    pub async fn register(&self, req: RegisterRequest) -> Result<Account, AppError> {
        let username = req.username.trim().to_string();
        if !USERNAME_LEN.contains(&username.chars().count()) {
            return Err(AppError::invalid("username must be between 3 and 50 characters"));
        }
        if username.chars().any(char::is_whitespace) {
            return Err(AppError::invalid("username must not contain whitespace"));
        }
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::invalid("password must be at least 6 characters"));
        }

        let invite = req
            .invite_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let (admission, role) = match invite {
            Some(code) => (Admission::Invite(code.to_string()), Role::User),
            None => (Admission::FirstAccount, Role::Admin),
        };

        let account = NewAccount {
            username,
            password_hash: hash_password(&req.password, self.bcrypt_cost)?,
            role,
        };
        let created = self.store.create_account(account, admission, Utc::now()).await?;

        info!(
            account_id = created.id,
            role = created.role.as_str(),
            invite = ?created.invite_code,
            "Registered account {}",
            created.username
        );
        Ok(created)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AppError> {
        let account = self
            .store
            .fetch_account_by_username(username.trim())
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        if !verify_password(password, &account.password_hash) {
            warn!("Failed login attempt for {}", account.username);
            return Err(AppError::InvalidCredentials);
        }
        if !account.is_active {
            return Err(LedgerError::AccountInactive.into());
        }

        Ok(LoginResponse {
            access_token: self.tokens.issue(&account)?,
            token_type: "bearer",
            account,
        })
    }

    /// Resolves a bearer token into the caller, re-reading role and active
    /// flag so that deactivation takes effect before the token expires.
    pub async fn authenticate(&self, token: &str) -> Result<Caller, AppError> {
        let claims = self.tokens.verify(token)?;
        let account_id: i64 = claims.sub.parse().map_err(|_| AppError::Unauthenticated)?;
        let account = match self.store.fetch_account(account_id).await {
            Ok(account) => account,
            Err(LedgerError::AccountNotFound) => return Err(AppError::Unauthenticated),
            Err(e) => return Err(e.into()),
        };
        if !account.is_active {
            return Err(LedgerError::AccountInactive.into());
        }
        Ok(Caller::of(&account))
    }

    /// Seeds an administrator from operator-supplied credentials. An existing
    /// account with that username is left untouched.
    pub async fn ensure_admin(&self, creds: &AdminCredentials) -> Result<Account, AppError> {
        if let Some(existing) = self.store.fetch_account_by_username(&creds.username).await? {
            if !existing.is_admin() {
                warn!("Bootstrap admin {} exists without the admin role", existing.username);
            }
            return Ok(existing);
        }

        let account = NewAccount {
            username: creds.username.clone(),
            password_hash: hash_password(&creds.password, self.bcrypt_cost)?,
            role: Role::Admin,
        };
        let created = self.store.create_account(account, Admission::Seed, Utc::now()).await?;
        info!(account_id = created.id, "Seeded admin account {}", created.username);
        Ok(created)
    }

    pub async fn me(&self, caller: &Caller) -> Result<Account, AppError> {
        Ok(self.store.fetch_account(caller.account_id).await?)
    }

    pub async fn list_accounts(&self, caller: &Caller, skip: i64, limit: i64) -> Result<Vec<Account>, AppError> {
        caller.require_admin()?;
        Ok(self
            .store
            .list_accounts(skip.max(0), limit.clamp(1, MAX_PAGE_SIZE))
            .await?)
    }

    pub async fn set_active(&self, caller: &Caller, account_id: i64, active: bool) -> Result<Account, AppError> {
        caller.require_admin()?;
        if !active && caller.account_id == account_id {
            return Err(AppError::invalid("administrators cannot deactivate themselves"));
        }
        let account = self.store.set_account_active(account_id, active).await?;
        info!(admin = caller.account_id, account_id, active, "Changed account activation");
        Ok(account)
    }

    pub async fn adjust_balance(&self, caller: &Caller, account_id: i64, delta: i32) -> Result<CreditEntry, AppError> {
        caller.require_admin()?;
        if delta == 0 {
            return Err(AppError::invalid("delta must not be zero"));
        }
        let entry = self.store.adjust_balance(account_id, delta, Utc::now()).await?;
        info!(
            admin = caller.account_id,
            account_id,
            delta,
            balance = entry.balance_after,
            "Adjusted balance"
        );
        Ok(entry)
    }

    pub async fn stats(&self, caller: &Caller) -> Result<LedgerStats, AppError> {
        caller.require_admin()?;
        Ok(self.store.ledger_stats(Utc::now()).await?)
    }
}
