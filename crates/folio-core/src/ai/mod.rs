mod ndjson;
pub mod ollama;
pub mod remote;

pub use ollama::{OllamaClient, OllamaEngine, OllamaLoader};
pub use remote::RemoteClient;
