use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::ContextSource;
use crate::error::{GenerationError, RetrievalError};
use crate::stream::{decode_text_stream, ChunkStream};

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct ContextResponse {
    #[serde(default)]
    context: Option<ContextField>,
}

/// The server sends either ranked passages or one pre-joined string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ContextField {
    Text(String),
    Passages(Vec<String>),
}

impl ContextField {
    fn into_text(self) -> String {
        match self {
            ContextField::Text(text) => text,
            ContextField::Passages(passages) => passages.join("\n\n"),
        }
    }
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

/// Client for the portfolio RAG server.
#[derive(Clone)]
pub struct RemoteClient {
    client: Client,
    base_url: String,
}

impl RemoteClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /` - the server answers with a one-line status.
    pub async fn health(&self) -> reqwest::Result<String> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        let health: HealthResponse = response.json().await?;
        Ok(health.status)
    }

    /// Fetch the passages relevant to `query`, joined in the order the
    /// server ranked them. A missing `context` field means no context.
    pub async fn retrieve(&self, query: &str) -> Result<String, RetrievalError> {
        let url = format!("{}/retrieve-context", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&QueryRequest { query })
            .send()
            .await
            .map_err(RetrievalError::Request)?;

        if !response.status().is_success() {
            return Err(RetrievalError::Status(response.status()));
        }

        let body = response.bytes().await.map_err(RetrievalError::Request)?;
        let parsed: ContextResponse = serde_json::from_slice(&body)?;
        let context = parsed.context.map(ContextField::into_text).unwrap_or_default();
        debug!(bytes = context.len(), "retrieved context");
        Ok(context)
    }

    /// `POST /chat` - the body is the raw reply text, streamed.
    pub async fn chat_stream(&self, query: &str) -> Result<ChunkStream, GenerationError> {
        let url = format!("{}/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&QueryRequest { query })
            .send()
            .await
            .map_err(GenerationError::Request)?;

        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status()));
        }

        if response.content_length() == Some(0) {
            return Err(GenerationError::NoBody);
        }

        Ok(decode_text_stream(response.bytes_stream()))
    }
}

#[async_trait]
impl ContextSource for RemoteClient {
    async fn retrieve(&self, query: &str) -> Result<String, RetrievalError> {
        RemoteClient::retrieve(self, query).await
    }
}
