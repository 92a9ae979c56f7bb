use crate::auth::Caller;
use crate::error::AppError;
use chrono::Utc;
use painter_db::models::{CodeKind, CodeStatus, CreditEntry, Redemption, normalize_code};
use painter_db::{AccountStore, CodeStore, LedgerError, LedgerStore};
use std::sync::Arc;
use tracing::{info, warn};

use super::account_service::MAX_PAGE_SIZE;

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Applies a redemption code to the caller's balance. Marking the code
    /// used and crediting its value happen in one store operation.
    pub async fn redeem(&self, caller: &Caller, code: &str) -> Result<Redemption, AppError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(AppError::invalid("code must not be empty"));
        }

        let redemption = self
            .store
            .redeem(&code, caller.account_id, Utc::now())
            .await
            .inspect_err(|e| warn!(account_id = caller.account_id, reason = e.kind(), "Redemption of {} refused", code))?;

        info!(
            account_id = caller.account_id,
            code_id = redemption.code.id,
            points = redemption.points_added,
            balance = redemption.balance,
            "Code redeemed"
        );
        Ok(redemption)
    }

    /// Whether `code` is an invite that could still admit a new account.
    pub async fn invite_is_valid(&self, code: &str) -> Result<bool, AppError> {
        match self.store.lookup_code(code, Utc::now()).await {
            Ok(found) => Ok(found.kind == CodeKind::Invite && found.status == CodeStatus::Unused),
            Err(LedgerError::CodeNotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn credit_history(&self, caller: &Caller, limit: i64) -> Result<Vec<CreditEntry>, AppError> {
        Ok(self
            .store
            .credit_history(caller.account_id, limit.clamp(1, MAX_PAGE_SIZE))
            .await?)
    }
}
