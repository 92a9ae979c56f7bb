use crate::auth::{Caller, TokenIssuer};
use crate::config::{AdminCredentials, PanelConfig};
use crate::services::account_service::AccountService;
use crate::services::issuance_service::{IssuanceService, IssueCodesRequest};
use anyhow::{Context, Result};
use painter_db::{AccountStore, LedgerStore};
use std::sync::Arc;

pub async fn create_admin(config: &PanelConfig, store: Arc<dyn LedgerStore>, username: &str, password: &str) -> Result<()> {
    let service = AccountService::new(
        store,
        TokenIssuer::new(config.jwt_secret.clone(), config.token_ttl_hours),
        config.bcrypt_cost,
    );
    let creds = AdminCredentials {
        username: username.to_string(),
        password: password.to_string(),
    };
    let account = service
        .ensure_admin(&creds)
        .await
        .context("Failed to create admin account")?;

    if account.is_admin() {
        println!("Admin '{}' is ready (id {}).", account.username, account.id);
    } else {
        println!(
            "Account '{}' already exists without the admin role; nothing changed.",
            account.username
        );
    }
    Ok(())
}

pub async fn issue_codes(store: Arc<dyn LedgerStore>, admin: &str, req: IssueCodesRequest) -> Result<()> {
    let account = store
        .fetch_account_by_username(admin)
        .await?
        .with_context(|| format!("No account named '{}'", admin))?;

    let service = IssuanceService::new(store);
    let codes = service
        .issue_codes(&Caller::of(&account), req)
        .await
        .context("Failed to issue codes")?;

    for code in &codes {
        match code.value {
            Some(value) => println!("{}\t{}", code.code, value),
            None => println!("{}", code.code),
        }
    }
    eprintln!("Issued {} code(s).", codes.len());
    Ok(())
}
