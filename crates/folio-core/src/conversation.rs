//! Conversation controller
//!
//! One turn at a time: a submit while busy, with blank input, or before the
//! backend is ready is silently dropped. An accepted turn always leaves the
//! transcript with a non-empty assistant reply and the busy flag cleared,
//! whatever happens in between.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::ReplyBackend;
use crate::error::TurnError;
use crate::state::ChatMessage;
use crate::stream::{self, GENERATION_FALLBACK};
use crate::transcript::Transcript;

/// Shown when context lookup fails; the turn never reaches generation.
pub const RETRIEVAL_FALLBACK: &str = "Sorry, I couldn't look that up right now. Please try again.";

/// Shown when the reply stream ends without any text.
pub const EMPTY_REPLY_FALLBACK: &str = "Sorry, I didn't get an answer for that. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Preconditions not met; nothing changed.
    Ignored,
    Completed,
    /// The placeholder now holds a fallback message.
    Failed,
}

#[derive(Clone)]
pub struct Conversation {
    transcript: Transcript,
    busy: Arc<AtomicBool>,
    backend: Arc<dyn ReplyBackend>,
}

impl Conversation {
    pub fn new(greeting: impl Into<String>, backend: Arc<dyn ReplyBackend>) -> Self {
        Self {
            transcript: Transcript::with_greeting(greeting),
            busy: Arc::new(AtomicBool::new(false)),
            backend,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Whether the input should accept a new question right now.
    pub fn can_submit(&self) -> bool {
        !self.is_busy() && self.backend.is_ready()
    }

    /// Accept a question and record it, without suspending.
    ///
    /// On success the busy flag is set and the transcript ends with the
    /// user message and an empty assistant placeholder. The returned
    /// [`Turn`] must be run (or dropped) to release the flag.
    pub fn begin(&self, text: &str) -> Option<Turn> {
        let question = text.trim();
        if question.is_empty() || !self.backend.is_ready() {
            return None;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("submit ignored, a turn is already in flight");
            return None;
        }
        let guard = BusyGuard(self.busy.clone());

        self.transcript.append(ChatMessage::user(question));
        let history = self.transcript.snapshot().as_ref().clone();
        self.transcript.append(ChatMessage::assistant(""));

        Some(Turn {
            question: question.to_string(),
            history,
            transcript: self.transcript.clone(),
            backend: self.backend.clone(),
            _busy: guard,
        })
    }

    /// `begin` followed by running the turn to completion.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        match self.begin(text) {
            Some(turn) => turn.run().await,
            None => SubmitOutcome::Ignored,
        }
    }
}

/// One accepted question on its way to an answer.
pub struct Turn {
    question: String,
    history: Vec<ChatMessage>,
    transcript: Transcript,
    backend: Arc<dyn ReplyBackend>,
    _busy: BusyGuard,
}

impl Turn {
    pub async fn run(self) -> SubmitOutcome {
        info!(chars = self.question.len(), "turn started");

        let chunks = match self.backend.reply(&self.question, &self.history).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(error = %err, "turn failed before streaming");
                self.transcript.replace_last(fallback_for(&err));
                return SubmitOutcome::Failed;
            }
        };

        match stream::consume(chunks, &self.transcript).await {
            Ok(reply) if reply.trim().is_empty() => {
                warn!("reply stream finished without text");
                self.transcript.replace_last(EMPTY_REPLY_FALLBACK);
                SubmitOutcome::Failed
            }
            Ok(reply) => {
                info!(bytes = reply.len(), "turn completed");
                SubmitOutcome::Completed
            }
            Err(failure) => {
                debug!(partial_bytes = failure.partial.len(), "discarded partial reply");
                SubmitOutcome::Failed
            }
        }
    }
}

fn fallback_for(err: &TurnError) -> &'static str {
    match err {
        TurnError::Retrieval(_) => RETRIEVAL_FALLBACK,
        TurnError::Generation(_) => GENERATION_FALLBACK,
    }
}

/// Clears the busy flag however the turn ends.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ContextSource, LocalBackend};
    use crate::engine::tests::{FixedLoader, ScriptedEngine};
    use crate::engine::{EngineManager, UserConsent};
    use crate::error::{GenerationError, RetrievalError};
    use crate::state::ChatRole;
    use crate::stream::ChunkStream;
    use async_trait::async_trait;
    use futures_util::stream::{self as futures_stream, StreamExt};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;

    const GREETING: &str = "Hello! Ask me anything about Ethan's portfolio.";

    enum Script {
        Chunks(Vec<Result<&'static str, &'static str>>),
        FailToOpen,
    }

    struct ScriptedBackend {
        script: Script,
        calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    }

    impl ScriptedBackend {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self { script, calls: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ReplyBackend for ScriptedBackend {
        async fn reply(&self, question: &str, history: &[ChatMessage]) -> Result<ChunkStream, TurnError> {
            self.calls.lock().push((question.to_string(), history.to_vec()));
            match &self.script {
                Script::Chunks(chunks) => {
                    let items: Vec<_> = chunks
                        .iter()
                        .map(|c| {
                            c.map(str::to_string)
                                .map_err(|e| GenerationError::Interrupted(e.to_string()))
                        })
                        .collect();
                    Ok(futures_stream::iter(items).boxed())
                }
                Script::FailToOpen => Err(GenerationError::Status(StatusCode::BAD_GATEWAY).into()),
            }
        }
    }

    struct FakeContext {
        context: Option<&'static str>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeContext {
        fn new(context: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self { context, queries: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ContextSource for FakeContext {
        async fn retrieve(&self, query: &str) -> Result<String, RetrievalError> {
            self.queries.lock().push(query.to_string());
            self.context
                .map(str::to_string)
                .ok_or(RetrievalError::Status(StatusCode::SERVICE_UNAVAILABLE))
        }
    }

    fn conversation(backend: Arc<dyn ReplyBackend>) -> Conversation {
        Conversation::new(GREETING, backend)
    }

    async fn ready_engine(engine: Arc<ScriptedEngine>) -> EngineManager {
        let manager = EngineManager::new(Arc::new(FixedLoader::succeeding(engine)));
        manager.load(UserConsent::given()).await;
        manager
    }

    #[tokio::test]
    async fn test_submit_appends_user_then_assistant() {
        let backend = ScriptedBackend::new(Script::Chunks(vec![Ok("He"), Ok("llo")]));
        let convo = conversation(backend.clone());

        let outcome = convo.submit("  Who is Ethan?  ").await;

        assert_eq!(outcome, SubmitOutcome::Completed);
        assert_eq!(
            convo.transcript().snapshot().as_slice(),
            &[
                ChatMessage::assistant(GREETING),
                ChatMessage::user("Who is Ethan?"),
                ChatMessage::assistant("Hello"),
            ]
        );
        assert!(!convo.is_busy());
        assert_eq!(backend.calls.lock()[0].0, "Who is Ethan?");
    }

    #[tokio::test]
    async fn test_reply_content_transitions_in_chunk_order() {
        let convo = conversation(ScriptedBackend::new(Script::Chunks(vec![Ok("He"), Ok("llo")])));
        let mut rx = convo.transcript().subscribe();

        convo.submit("hi").await;

        let replies: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|snap| snap.len() == 3)
            .map(|snap| snap[2].content.clone())
            .collect();
        assert_eq!(replies, vec!["", "He", "Hello"]);
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let backend = ScriptedBackend::new(Script::Chunks(vec![Ok("x")]));
        let convo = conversation(backend.clone());

        for text in ["", "   ", "\n\t"] {
            assert_eq!(convo.submit(text).await, SubmitOutcome::Ignored);
        }
        assert_eq!(convo.transcript().len(), 1);
        assert!(backend.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_submit_while_busy_is_ignored() {
        let convo = conversation(ScriptedBackend::new(Script::Chunks(vec![Ok("first")])));

        let turn = convo.begin("first question").expect("idle conversation accepts");
        assert!(convo.is_busy());
        assert!(!convo.can_submit());
        assert_eq!(convo.submit("second question").await, SubmitOutcome::Ignored);
        assert_eq!(convo.transcript().len(), 3);

        assert_eq!(turn.run().await, SubmitOutcome::Completed);
        assert!(!convo.is_busy());
        assert_eq!(convo.submit("second question").await, SubmitOutcome::Completed);
        assert_eq!(convo.transcript().len(), 5);
    }

    #[tokio::test]
    async fn test_dropping_a_turn_releases_busy() {
        let convo = conversation(ScriptedBackend::new(Script::Chunks(vec![])));
        let turn = convo.begin("question");
        assert!(convo.is_busy());
        drop(turn);
        assert!(!convo.is_busy());
    }

    #[tokio::test]
    async fn test_generation_failure_restores_idle_with_fallback() {
        let convo = conversation(ScriptedBackend::new(Script::FailToOpen));

        assert_eq!(convo.submit("hello?").await, SubmitOutcome::Failed);

        let snapshot = convo.transcript().snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[2], ChatMessage::assistant(GENERATION_FALLBACK));
        assert!(!convo.is_busy());
    }

    #[tokio::test]
    async fn test_broken_stream_discards_partial_reply() {
        let convo = conversation(ScriptedBackend::new(Script::Chunks(vec![Ok("Ethan knows"), Err("eof")])));

        assert_eq!(convo.submit("skills?").await, SubmitOutcome::Failed);
        assert_eq!(convo.transcript().snapshot()[2].content, GENERATION_FALLBACK);
        assert!(!convo.is_busy());
    }

    #[tokio::test]
    async fn test_empty_reply_gets_fallback() {
        let convo = conversation(ScriptedBackend::new(Script::Chunks(vec![Ok(""), Ok("")])));

        assert_eq!(convo.submit("anything").await, SubmitOutcome::Failed);
        assert_eq!(convo.transcript().snapshot()[2].content, EMPTY_REPLY_FALLBACK);
    }

    #[tokio::test]
    async fn test_local_turn_builds_prompt_from_context_and_history() {
        let engine = Arc::new(ScriptedEngine::new(vec!["Rust", " and Go"]));
        let context = FakeContext::new(Some("Ethan writes Rust.\n\nEthan writes Go."));
        let backend = LocalBackend::new(context.clone(), ready_engine(engine.clone()).await).with_temperature(0.2);
        let convo = conversation(Arc::new(backend));

        assert_eq!(convo.submit("Which languages?").await, SubmitOutcome::Completed);
        assert_eq!(convo.transcript().snapshot()[2].content, "Rust and Go");
        assert_eq!(context.queries.lock().as_slice(), &["Which languages?".to_string()]);

        let requests = engine.requests.lock();
        let request = &requests[0];
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, ChatRole::System);
        assert!(request.messages[0].content.ends_with("Ethan writes Rust.\n\nEthan writes Go."));
        assert_eq!(request.messages[1], ChatMessage::assistant(GREETING));
        assert_eq!(request.messages[2], ChatMessage::user("Which languages?"));
    }

    #[tokio::test]
    async fn test_local_turn_carries_previous_turns() {
        let engine = Arc::new(ScriptedEngine::new(vec!["ok"]));
        let backend = LocalBackend::new(FakeContext::new(Some("ctx")), ready_engine(engine.clone()).await);
        let convo = conversation(Arc::new(backend));

        convo.submit("first").await;
        convo.submit("second").await;

        let requests = engine.requests.lock();
        let roles: Vec<ChatRole> = requests[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::Assistant, ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
        assert_eq!(requests[1].messages[3].content, "ok");
    }

    #[tokio::test]
    async fn test_retrieval_failure_skips_generation() {
        let engine = Arc::new(ScriptedEngine::new(vec!["never"]));
        let backend = LocalBackend::new(FakeContext::new(None), ready_engine(engine.clone()).await);
        let convo = conversation(Arc::new(backend));

        assert_eq!(convo.submit("question").await, SubmitOutcome::Failed);
        assert_eq!(convo.transcript().snapshot()[2].content, RETRIEVAL_FALLBACK);
        assert!(engine.requests.lock().is_empty());
        assert!(!convo.is_busy());
    }

    #[tokio::test]
    async fn test_local_submit_before_engine_ready_is_ignored() {
        let engine = Arc::new(ScriptedEngine::new(vec!["never"]));
        let manager = EngineManager::new(Arc::new(FixedLoader::succeeding(engine.clone())));
        let context = FakeContext::new(Some("ctx"));
        let convo = conversation(Arc::new(LocalBackend::new(context.clone(), manager)));

        assert!(!convo.can_submit());
        assert_eq!(convo.submit("question").await, SubmitOutcome::Ignored);
        assert_eq!(convo.transcript().len(), 1);
        assert!(context.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_engine_never_generates() {
        let manager = EngineManager::new(Arc::new(FixedLoader::failing()));
        manager.load(UserConsent::given()).await;
        let context = FakeContext::new(Some("ctx"));
        let convo = conversation(Arc::new(LocalBackend::new(context.clone(), manager)));

        assert_eq!(convo.submit("question").await, SubmitOutcome::Ignored);
        assert_eq!(convo.transcript().len(), 1);
        assert!(context.queries.lock().is_empty());
    }
}
