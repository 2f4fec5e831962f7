pub mod ai;
pub mod backend;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod prompt;
pub mod provider;
pub mod state;
pub mod stream;
pub mod transcript;

// Re-export main types for convenience
pub use ai::{OllamaClient, OllamaLoader, RemoteClient};
pub use backend::{LocalBackend, RemoteBackend, ReplyBackend};
pub use config::Config;
pub use conversation::{Conversation, SubmitOutcome, Turn};
pub use engine::{EngineHandle, EngineManager, EngineState, UserConsent};
pub use error::{EngineAcquisitionError, GenerationError, RetrievalError, TurnError};
pub use provider::Backend;
pub use state::{ChatMessage, ChatRole};
pub use transcript::{Snapshot, Transcript};
