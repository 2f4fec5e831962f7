use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ndjson;
use crate::engine::{probe_acceleration, Acceleration, ChatEngine, ChatRequest, EngineLoader, ProgressFn};
use crate::error::{EngineAcquisitionError, GenerationError};
use crate::state::ChatMessage;
use crate::stream::ChunkStream;

const MEGABYTE: u64 = 1024 * 1024;

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatRecord {
    #[serde(default)]
    message: Option<OllamaDelta>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaDelta {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct OllamaPullRequest<'a> {
    model: &'a str,
    stream: bool,
}

/// One progress record from `/api/pull`.
#[derive(Debug, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PullProgress {
    /// Human-readable progress line, e.g. `pulling 6a07: 42% (113/270 MB)`.
    pub fn describe(&self) -> String {
        match (self.completed, self.total) {
            (Some(done), Some(total)) if total > 0 => format!(
                "{}: {}% ({}/{} MB)",
                self.status,
                u128::from(done.min(total)) * 100 / u128::from(total),
                done / MEGABYTE,
                total / MEGABYTE
            ),
            _ => self.status.clone(),
        }
    }
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>, EngineAcquisitionError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(EngineAcquisitionError::Unreachable)?;

        if !response.status().is_success() {
            return Err(EngineAcquisitionError::Status(response.status()));
        }

        let models_response: OllamaModelsResponse = response
            .json()
            .await
            .map_err(EngineAcquisitionError::Unreachable)?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }

    /// Installed models are listed with a tag; a bare name means `:latest`.
    pub async fn has_model(&self, name: &str) -> Result<bool, EngineAcquisitionError> {
        let models = self.list_models().await?;
        let latest = format!("{}:latest", name);
        Ok(models.iter().any(|m| m == name || *m == latest))
    }

    /// Download `model`, reporting each progress record.
    pub async fn pull_model(&self, model: &str, progress: &ProgressFn) -> Result<(), EngineAcquisitionError> {
        let url = format!("{}/api/pull", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&OllamaPullRequest { model, stream: true })
            .send()
            .await
            .map_err(EngineAcquisitionError::Unreachable)?;

        if !response.status().is_success() {
            return Err(EngineAcquisitionError::Status(response.status()));
        }

        let mut records = ndjson::records::<PullProgress>(response);
        let mut last_status = String::new();
        while let Some(record) = records.next().await {
            let record = record?;
            if let Some(error) = record.error {
                return Err(EngineAcquisitionError::Pull(error));
            }
            progress(record.describe());
            last_status = record.status;
        }

        if last_status != "success" {
            return Err(EngineAcquisitionError::Pull(format!(
                "download of {} ended before completion",
                model
            )));
        }
        Ok(())
    }

    /// `POST /api/chat` with streaming on; each record carries one delta.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<ChunkStream, GenerationError> {
        let url = format!("{}/api/chat", self.base_url);

        let request = OllamaChatRequest {
            model,
            messages,
            stream: true,
            options: OllamaOptions { temperature },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(GenerationError::Request)?;

        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status()));
        }

        let deltas = ndjson::records::<OllamaChatRecord>(response).filter_map(|record| async move {
            match record {
                Err(err) => Some(Err(err.into())),
                Ok(OllamaChatRecord { error: Some(error), .. }) => Some(Err(GenerationError::Engine(error))),
                Ok(OllamaChatRecord { message, done, .. }) => {
                    let content = message.map(|m| m.content).unwrap_or_default();
                    // The closing record repeats nothing; don't count it as a chunk.
                    if done && content.is_empty() {
                        None
                    } else {
                        Some(Ok(content))
                    }
                }
            }
        });
        Ok(deltas.boxed())
    }
}

/// A ready local engine: one model on one Ollama instance.
pub struct OllamaEngine {
    client: OllamaClient,
    model: String,
}

impl OllamaEngine {
    pub fn new(client: OllamaClient, model: &str) -> Self {
        Self { client, model: model.to_string() }
    }
}

#[async_trait]
impl ChatEngine for OllamaEngine {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, GenerationError> {
        debug!(model = %self.model, messages = request.messages.len(), "local chat request");
        self.client
            .chat_stream(&self.model, &request.messages, request.temperature)
            .await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Acquires an [`OllamaEngine`], pulling the model first if needed.
pub struct OllamaLoader {
    client: OllamaClient,
    model: String,
}

impl OllamaLoader {
    pub fn new(client: OllamaClient, model: &str) -> Self {
        Self { client, model: model.to_string() }
    }
}

#[async_trait]
impl EngineLoader for OllamaLoader {
    fn probe(&self) -> Acceleration {
        probe_acceleration()
    }

    async fn load(&self, progress: &ProgressFn) -> Result<Arc<dyn ChatEngine>, EngineAcquisitionError> {
        progress("Connecting to local engine...".to_string());

        if self.client.has_model(&self.model).await? {
            info!(model = %self.model, "model already installed, skipping download");
            progress(format!("Model {} already available", self.model));
        } else {
            info!(model = %self.model, "pulling model");
            progress(format!("Downloading {}...", self.model));
            self.client.pull_model(&self.model, progress).await?;
        }

        Ok(Arc::new(OllamaEngine::new(self.client.clone(), &self.model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_with_byte_counts() {
        let progress = PullProgress {
            status: "pulling 6a07".to_string(),
            total: Some(270 * MEGABYTE),
            completed: Some(113 * MEGABYTE),
            error: None,
        };
        assert_eq!(progress.describe(), "pulling 6a07: 41% (113/270 MB)");
    }

    #[test]
    fn test_describe_without_counts_is_status() {
        let progress: PullProgress = serde_json::from_str(r#"{"status":"pulling manifest"}"#).unwrap();
        assert_eq!(progress.describe(), "pulling manifest");
    }

    #[test]
    fn test_describe_huge_totals_do_not_overflow() {
        let progress = PullProgress {
            status: "pulling".to_string(),
            total: Some(u64::MAX),
            completed: Some(u64::MAX / 2),
            error: None,
        };
        assert!(progress.describe().starts_with("pulling: 49% ("), "got {}", progress.describe());
    }

    #[test]
    fn test_describe_zero_total_does_not_divide() {
        let progress = PullProgress {
            status: "verifying".to_string(),
            total: Some(0),
            completed: Some(0),
            error: None,
        };
        assert_eq!(progress.describe(), "verifying");
    }
}
