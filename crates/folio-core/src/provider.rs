/// Which strategy produces the assistant stream for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// The RAG server streams the whole answer from `/chat`.
    #[default]
    Remote,
    /// Context comes from `/retrieve-context`, generation runs on the local engine.
    Local,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Remote => "remote",
            Backend::Local => "local",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "remote" | "server" => Some(Backend::Remote),
            "local" | "ollama" => Some(Backend::Local),
            _ => None,
        }
    }

    pub fn all() -> Vec<Backend> {
        vec![Backend::Remote, Backend::Local]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Backend::Remote => "Remote (RAG server)",
            Backend::Local => "Local (Ollama)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_round_trips_as_str() {
        for backend in Backend::all() {
            assert_eq!(Backend::from_str(backend.as_str()), Some(backend));
        }
    }

    #[test]
    fn test_from_str_accepts_aliases() {
        assert_eq!(Backend::from_str(" Ollama "), Some(Backend::Local));
        assert_eq!(Backend::from_str("SERVER"), Some(Backend::Remote));
        assert_eq!(Backend::from_str("wasm"), None);
    }
}
