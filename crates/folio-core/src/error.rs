use reqwest::StatusCode;
use thiserror::Error;

/// Fetching context passages from `/retrieve-context` failed.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("retrieval endpoint returned status {0}")]
    Status(StatusCode),
    #[error("malformed retrieval response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Producing the assistant stream failed, either before the first chunk
/// or while the stream was being read.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("generation endpoint returned status {0}")]
    Status(StatusCode),
    #[error("generation response has no body")]
    NoBody,
    #[error("stream interrupted: {0}")]
    Interrupted(String),
    #[error("engine reported an error: {0}")]
    Engine(String),
    #[error("local engine is not ready")]
    NotReady,
}

/// The local engine could not be acquired.
#[derive(Debug, Error)]
pub enum EngineAcquisitionError {
    #[error("local engine unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("local engine returned status {0}")]
    Status(StatusCode),
    #[error("model download failed: {0}")]
    Pull(String),
    #[error(transparent)]
    Progress(#[from] RecordError),
}

/// Reading one newline-delimited JSON record from a streamed body failed.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("stream read failed: {0}")]
    Read(#[from] reqwest::Error),
    #[error("malformed record: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<RecordError> for GenerationError {
    fn from(err: RecordError) -> Self {
        GenerationError::Interrupted(err.to_string())
    }
}

/// Any failure between accepting a turn and finishing its stream.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}
