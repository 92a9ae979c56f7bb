use super::{ImageProvider, ProviderRequest};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use painter_db::models::Artifact;
use serde_json::{Value, json};

/// Client for OpenAI-compatible `/v1/images/generations` endpoints.
pub struct OpenAiImageProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiImageProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/images/generations", self.base_url)
    }
}

/// Pulls the first image out of a generations response. Providers disagree on
/// the field name, so `b64_json`, `url` and `image_url` are all accepted.
pub fn extract_artifact(response: &Value) -> Option<Artifact> {
    let data = response.get("data")?;
    let item = match data {
        Value::Array(items) => items.first()?,
        Value::Object(_) => data,
        _ => return None,
    };

    let text = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(b64) = text("b64_json") {
        return Some(Artifact {
            image_url: None,
            image_b64: Some(b64),
        });
    }
    text("url").or_else(|| text("image_url")).map(|url| Artifact {
        image_url: Some(url),
        image_b64: None,
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    async fn generate(&self, request: &ProviderRequest) -> Result<Artifact> {
        if self.api_key.is_empty() {
            bail!("Image provider API key is not configured");
        }

        let payload = json!({
            "prompt": request.prompt,
            "model": request.model,
            "n": 1,
            "size": request.size,
            "output_format": request.output_format,
        });

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("API call failed: {} - {}", status.as_u16(), error_message(&body));
        }

        let body: Value = resp.json().await?;
        extract_artifact(&body).ok_or_else(|| anyhow!("No image data in response"))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
