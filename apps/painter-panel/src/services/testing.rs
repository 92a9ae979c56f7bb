//! Fixtures shared by service and router tests.

use crate::auth::TokenIssuer;
use crate::config::MIN_BCRYPT_COST;
use crate::services::account_service::AccountService;
use crate::services::generation_service::{GenerationDefaults, GenerationService};
use crate::services::provider::{ImageProvider, ProviderRequest};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use painter_db::models::{Account, Admission, Artifact, CodeKind, NewAccount, NewCode, Role};
use painter_db::{AccountStore, CodeStore, LedgerStore, MemoryStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const TEST_SECRET: &str = "painter-test-secret";
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

enum Behaviour {
    Succeed,
    Fail(String),
    Hang(Duration),
}

/// Provider double with a fixed outcome that counts its calls.
pub struct ScriptedProvider {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::with(Behaviour::Succeed)
    }

    pub fn failing(reason: &str) -> Self {
        Self::with(Behaviour::Fail(reason.to_string()))
    }

    pub fn hanging(delay: Duration) -> Self {
        Self::with(Behaviour::Hang(delay))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for ScriptedProvider {
    async fn generate(&self, request: &ProviderRequest) -> Result<Artifact> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behaviour {
            Behaviour::Succeed => Ok(Artifact {
                image_url: Some(format!("https://images.test/{}/{}.png", call, request.size)),
                image_b64: None,
            }),
            Behaviour::Fail(reason) => Err(anyhow!("API call failed: 400 - {}", reason)),
            Behaviour::Hang(delay) => {
                tokio::time::sleep(*delay).await;
                Err(anyhow!("slept through the timeout"))
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn defaults() -> GenerationDefaults {
    GenerationDefaults {
        model: "test-model".into(),
        size: "1024x1024".into(),
        output_format: "png".into(),
    }
}

pub fn account_service(store: Arc<dyn LedgerStore>) -> AccountService {
    AccountService::new(store, TokenIssuer::new(TEST_SECRET, 1), MIN_BCRYPT_COST)
}

pub fn generation_service(store: Arc<dyn LedgerStore>, provider: Arc<dyn ImageProvider>) -> GenerationService {
    GenerationService::new(store, provider, PROVIDER_TIMEOUT, defaults())
}

/// Inserts an account directly, bypassing the admission rules, and funds it.
pub async fn seed_account(store: &MemoryStore, username: &str, role: Role, balance: i32) -> Account {
    let account = store
        .create_account(
            NewAccount {
                username: username.to_string(),
                password_hash: bcrypt::hash("secret123", MIN_BCRYPT_COST).unwrap(),
                role,
            },
            Admission::Seed,
            Utc::now(),
        )
        .await
        .unwrap();
    if balance > 0 {
        store.adjust_balance(account.id, balance, Utc::now()).await.unwrap();
    }
    store.fetch_account(account.id).await.unwrap()
}

pub async fn issue_redemption(
    store: &MemoryStore,
    admin_id: i64,
    value: i32,
    expires_at: Option<DateTime<Utc>>,
) -> String {
    insert(store, CodeKind::Redemption, Some(value), expires_at, admin_id).await
}

pub async fn issue_invite(store: &MemoryStore, admin_id: i64) -> String {
    insert(store, CodeKind::Invite, None, None, admin_id).await
}

async fn insert(
    store: &MemoryStore,
    kind: CodeKind,
    value: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
    admin_id: i64,
) -> String {
    let code = crate::services::issuance_service::generate_code(kind);
    store
        .insert_code(NewCode {
            code,
            kind,
            value,
            expires_at,
            created_by: Some(admin_id),
        })
        .await
        .unwrap()
        .expect("fresh code collided")
        .code
}
