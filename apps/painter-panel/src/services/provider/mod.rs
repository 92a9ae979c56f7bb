use anyhow::Result;
use async_trait::async_trait;
use painter_db::models::Artifact;
use serde::Serialize;

pub mod openai;

pub use openai::OpenAiImageProvider;

#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    pub prompt: String,
    pub model: String,
    pub size: String,
    pub output_format: String,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Produce one image for the request. Any error is treated as a provider
    /// failure by the caller.
    async fn generate(&self, request: &ProviderRequest) -> Result<Artifact>;

    /// Get the provider name
    fn name(&self) -> &str;
}
