mod auth;
mod cli;
mod config;
mod error;
mod handlers;
mod services;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::PanelConfig;
use painter_db::LedgerStore;
use painter_db::models::CodeKind;
use services::account_service::AccountService;
use services::generation_service::GenerationService;
use services::issuance_service::{IssuanceService, IssueCodesRequest};
use services::ledger_service::LedgerService;
use services::provider::{ImageProvider, OpenAiImageProvider};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
pub struct AppState {
    pub account_service: Arc<AccountService>,
    pub ledger_service: Arc<LedgerService>,
    pub generation_service: Arc<GenerationService>,
    pub issuance_service: Arc<IssuanceService>,
}

impl AppState {
    pub fn new(config: &PanelConfig, store: Arc<dyn LedgerStore>, provider: Arc<dyn ImageProvider>) -> Self {
        let tokens = auth::TokenIssuer::new(config.jwt_secret.clone(), config.token_ttl_hours);
        Self {
            account_service: Arc::new(AccountService::new(store.clone(), tokens, config.bcrypt_cost)),
            ledger_service: Arc::new(LedgerService::new(store.clone())),
            generation_service: Arc::new(GenerationService::new(
                store.clone(),
                provider,
                config.provider_timeout(),
                (&config.provider).into(),
            )),
            issuance_service: Arc::new(IssuanceService::new(store)),
        }
    }
}

#[derive(Parser)]
#[command(name = "painter-panel")]
#[command(about = "Credit ledger and image generation gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and the stale generation sweep
    Serve,
    /// Administrative tools
    Admin {
        #[command(subcommand)]
        subcommand: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create an administrator account if it does not exist yet
    CreateAdmin {
        username: String,
        password: String,
    },
    /// Mint redemption or invite codes and print them
    IssueCodes {
        /// Username of the issuing admin
        #[arg(long)]
        admin: String,
        /// redemption or invite
        #[arg(long)]
        kind: CodeKind,
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Credit value of each redemption code
        #[arg(long)]
        value: Option<i32>,
        /// RFC 3339 timestamp, "YYYY-MM-DD HH:MM:SS" or a date
        #[arg(long)]
        expires_at: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let file_appender = tracing_appender::rolling::never(".", "panel.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "painter_panel=debug,painter_db=info,tower_http=info,sqlx=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let cli = Cli::parse();
    let config = PanelConfig::load()?;
    let store = painter_db::open_store(&config.database_url, config.max_connections).await?;

    match cli.command {
        Commands::Serve => run_server(config, store).await?,
        Commands::Admin { subcommand } => match subcommand {
            AdminCommands::CreateAdmin { username, password } => {
                cli::create_admin(&config, store, &username, &password).await?;
            }
            AdminCommands::IssueCodes {
                admin,
                kind,
                count,
                value,
                expires_at,
            } => {
                let req = IssueCodesRequest {
                    kind,
                    count,
                    value,
                    expires_at,
                };
                cli::issue_codes(store, &admin, req).await?;
            }
        },
    }

    Ok(())
}

async fn run_server(config: PanelConfig, store: Arc<dyn LedgerStore>) -> Result<()> {
    let provider: Arc<dyn ImageProvider> = Arc::new(OpenAiImageProvider::new(
        config.provider.base_url.clone(),
        config.provider.api_key.clone(),
    ));
    if config.provider.api_key.is_empty() {
        tracing::warn!("Image provider API key is empty; every generation will be refunded");
    }

    let state = AppState::new(&config, store, provider);

    if let Some(creds) = &config.bootstrap_admin {
        state
            .account_service
            .ensure_admin(creds)
            .await
            .context("Failed to seed bootstrap admin")?;
    }

    start_recovery_loop(state.clone(), &config);

    let app = handlers::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    tracing::info!("Panel listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Refunds generations whose request died between debit and finalization.
fn start_recovery_loop(state: AppState, config: &PanelConfig) {
    let every = config.sweep_interval();
    let max_age = config.stale_after();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            match state.generation_service.recover_stale(max_age).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Recovered {} stale generation(s)", n),
                Err(e) => tracing::warn!("Stale generation sweep failed: {}", e),
            }
        }
    });
}
