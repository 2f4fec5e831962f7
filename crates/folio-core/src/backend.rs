//! The two ways a turn can produce its reply stream.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::ai::RemoteClient;
use crate::engine::{ChatRequest, EngineManager};
use crate::error::{GenerationError, RetrievalError, TurnError};
use crate::prompt;
use crate::state::ChatMessage;
use crate::stream::ChunkStream;

/// Default sampling temperature for the local engine.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Produces the assistant stream for one turn.
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    /// Whether a turn may start right now. Remote is always ready.
    fn is_ready(&self) -> bool {
        true
    }

    /// `history` is the transcript up to and including the new question,
    /// without the empty reply placeholder.
    async fn reply(&self, question: &str, history: &[ChatMessage]) -> Result<ChunkStream, TurnError>;
}

/// Looks up context passages for a question.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<String, RetrievalError>;
}

/// The server does retrieval and generation; the question goes straight to `/chat`.
pub struct RemoteBackend {
    client: RemoteClient,
}

impl RemoteBackend {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReplyBackend for RemoteBackend {
    async fn reply(&self, question: &str, _history: &[ChatMessage]) -> Result<ChunkStream, TurnError> {
        debug!(base_url = self.client.base_url(), "requesting remote reply stream");
        Ok(self.client.chat_stream(question).await?)
    }
}

/// Retrieval on the server, generation on the local engine.
pub struct LocalBackend {
    context: Arc<dyn ContextSource>,
    engine: EngineManager,
    temperature: f32,
}

impl LocalBackend {
    pub fn new(context: Arc<dyn ContextSource>, engine: EngineManager) -> Self {
        Self { context, engine, temperature: DEFAULT_TEMPERATURE }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ReplyBackend for LocalBackend {
    fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    async fn reply(&self, question: &str, history: &[ChatMessage]) -> Result<ChunkStream, TurnError> {
        let engine = self.engine.handle().ok_or(GenerationError::NotReady)?;

        let context = self.context.retrieve(question).await?;
        debug!(context_bytes = context.len(), "context retrieved");

        let request = ChatRequest {
            messages: prompt::build(&context, history),
            temperature: self.temperature,
        };
        Ok(engine.stream_chat(request).await?)
    }
}
