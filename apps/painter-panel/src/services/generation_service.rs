use crate::auth::Caller;
use crate::config::ProviderConfig;
use crate::error::AppError;
use crate::services::provider::{ImageProvider, ProviderRequest};
use chrono::Utc;
use painter_db::models::{Generation, NewGeneration};
use painter_db::{AccountStore, GenerationStore, LedgerError, LedgerStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::account_service::MAX_PAGE_SIZE;

const MAX_PROMPT_CHARS: usize = 4000;
const STALE_REASON: &str = "Abandoned before the provider responded";

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationHistory {
    pub generations: Vec<Generation>,
    pub total_count: i64,
    pub credit_balance: i32,
}

#[derive(Debug, Clone)]
pub struct GenerationDefaults {
    pub model: String,
    pub size: String,
    pub output_format: String,
}

impl From<&ProviderConfig> for GenerationDefaults {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            size: config.default_size.clone(),
            output_format: config.output_format.clone(),
        }
    }
}

/// Charges one credit per generation and refunds it when the provider fails
/// or does not answer in time.
pub struct GenerationService {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn ImageProvider>,
    timeout: Duration,
    defaults: GenerationDefaults,
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn ImageProvider>,
        timeout: Duration,
        defaults: GenerationDefaults,
    ) -> Self {
        Self {
            store,
            provider,
            timeout,
            defaults,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn request_generation(&self, caller: &Caller, req: GenerationRequest) -> Result<Generation, AppError> {
        let prompt = req.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AppError::invalid("prompt must not be empty"));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(AppError::invalid("prompt is too long"));
        }

        let pick = |value: Option<String>, default: &str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let request = ProviderRequest {
            prompt,
            model: pick(req.model, &self.defaults.model),
            size: pick(req.size, &self.defaults.size),
            output_format: pick(req.output_format, &self.defaults.output_format),
        };

        let pending = self
            .store
            .begin_generation(
                caller.account_id,
                NewGeneration {
                    prompt: request.prompt.clone(),
                    model: request.model.clone(),
                    size: request.size.clone(),
                },
                Utc::now(),
            )
            .await?;
        info!(
            account_id = caller.account_id,
            generation_id = pending.id,
            provider = self.provider.name(),
            model = %request.model,
            "Generation admitted"
        );

        match tokio::time::timeout(self.timeout, self.provider.generate(&request)).await {
            Ok(Ok(artifact)) => {
                let done = self.store.complete_generation(pending.id, artifact, Utc::now()).await?;
                info!(generation_id = done.id, "Generation succeeded");
                Ok(done)
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                warn!(generation_id = pending.id, "Image provider failed: {}", reason);
                self.refund(pending.id, &reason).await?;
                Err(AppError::ProviderFailure {
                    generation_id: pending.id,
                    reason,
                })
            }
            Err(_) => {
                warn!(generation_id = pending.id, "Image provider timed out after {:?}", self.timeout);
                let reason = format!("Image provider timed out after {:?}", self.timeout);
                self.refund(pending.id, &reason).await?;
                Err(AppError::ProviderTimeout {
                    generation_id: pending.id,
                    after: self.timeout,
                })
            }
        }
    }

    async fn refund(&self, generation_id: i64, reason: &str) -> Result<(), AppError> {
        match self.store.fail_generation(generation_id, reason, Utc::now()).await {
            Ok(_) => Ok(()),
            // The stale sweep already failed and refunded this record.
            Err(LedgerError::GenerationFinalized(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn history(&self, caller: &Caller, skip: i64, limit: i64) -> Result<GenerationHistory, AppError> {
        let (generations, total_count) = self
            .store
            .generation_history(caller.account_id, skip.max(0), limit.clamp(1, MAX_PAGE_SIZE))
            .await?;
        let account = self.store.fetch_account(caller.account_id).await?;
        Ok(GenerationHistory {
            generations,
            total_count,
            credit_balance: account.credit_balance,
        })
    }

    /// Fails and refunds every record still pending after `max_age`. Returns
    /// how many records were recovered.
    pub async fn recover_stale(&self, max_age: Duration) -> Result<usize, AppError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid stale age: {}", e)))?;
        let now = Utc::now();
        let stale = self.store.stale_generations(now - max_age).await?;

        let mut recovered = 0;
        for generation in stale {
            match self.store.fail_generation(generation.id, STALE_REASON, now).await {
                Ok(_) => {
                    recovered += 1;
                    warn!(
                        generation_id = generation.id,
                        account_id = generation.account_id,
                        "Refunded abandoned generation"
                    );
                }
                Err(LedgerError::GenerationFinalized(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(recovered)
    }
}
