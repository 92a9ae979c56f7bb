use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;
use std::time::Duration;

const CONFIG_PATHS: [&str; 2] = ["/etc/painter/panel.toml", "./panel.toml"];

/// Work factor range `bcrypt::hash` accepts.
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// PostgreSQL URL. Empty selects the in-memory store.
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub bootstrap_admin: Option<AdminCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub default_model: String,
    pub default_size: String,
    pub output_format: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            default_model: "gpt-image-1".to_string(),
            default_size: "1024x1024".to_string(),
            output_format: "png".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

fn default_max_connections() -> u32 {
    10
}

fn default_listen_port() -> u16 {
    8000
}

fn default_token_ttl_hours() -> i64 {
    24 * 7
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_stale_after_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl PanelConfig {
    pub fn load() -> Result<Self> {
        for path in CONFIG_PATHS {
            if let Ok(contents) = fs::read_to_string(path) {
                tracing::info!("Loading config from {}", path);
                return Self::from_toml(&contents).with_context(|| format!("Invalid config file {}", path));
            }
        }

        tracing::info!("Loading config from environment");
        Self::from_env()
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let defaults = ProviderConfig::default();
        let bootstrap_admin = match (std::env::var("ADMIN_USERNAME"), std::env::var("ADMIN_PASSWORD")) {
            (Ok(username), Ok(password)) => Some(AdminCredentials { username, password }),
            _ => None,
        };

        let config = Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            max_connections: env_or("DB_MAX_CONNECTIONS", default_max_connections()),
            listen_port: env_or("LISTEN_PORT", default_listen_port()),
            jwt_secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            token_ttl_hours: env_or("TOKEN_TTL_HOURS", default_token_ttl_hours()),
            bcrypt_cost: env_or("BCRYPT_COST", default_bcrypt_cost()),
            provider: ProviderConfig {
                base_url: std::env::var("AI_API_BASE_URL").unwrap_or(defaults.base_url),
                api_key: std::env::var("AI_API_KEY").unwrap_or_default(),
                default_model: std::env::var("AI_DEFAULT_MODEL").unwrap_or(defaults.default_model),
                default_size: std::env::var("AI_DEFAULT_SIZE").unwrap_or(defaults.default_size),
                output_format: std::env::var("AI_OUTPUT_FORMAT").unwrap_or(defaults.output_format),
                timeout_secs: env_or("AI_TIMEOUT_SECS", defaults.timeout_secs),
            },
            stale_after_secs: env_or("STALE_AFTER_SECS", default_stale_after_secs()),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", default_sweep_interval_secs()),
            bootstrap_admin,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.jwt_secret.trim().is_empty() {
            bail!("jwt_secret must not be empty");
        }
        if self.token_ttl_hours <= 0 {
            bail!("token_ttl_hours must be positive");
        }
        if self.provider.timeout_secs == 0 {
            bail!("provider.timeout_secs must be positive");
        }
        if self.sweep_interval_secs == 0 {
            bail!("sweep_interval_secs must be positive");
        }
        // A live provider call must never look abandoned to the sweep.
        if self.stale_after_secs <= self.provider.timeout_secs {
            bail!(
                "stale_after_secs ({}) must exceed provider.timeout_secs ({})",
                self.stale_after_secs,
                self.provider.timeout_secs
            );
        }
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.bcrypt_cost) {
            bail!("bcrypt_cost must be between {} and {}", MIN_BCRYPT_COST, MAX_BCRYPT_COST);
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
