//! Local engine lifecycle
//!
//! The local engine is acquired at most once per session and only after
//! the user has agreed to the download. State only moves forward:
//!
//! ```text
//! NotStarted -> Loading -> Ready
//!                       -> Failed -> (explicit retry) -> Loading
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{EngineAcquisitionError, GenerationError};
use crate::state::ChatMessage;
use crate::stream::ChunkStream;

/// Shown in the status line when acquisition fails.
pub const ENGINE_UNSUPPORTED: &str = "Local inference may not be supported on this system.";

/// Receives human-readable progress text during acquisition.
pub type ProgressFn = dyn Fn(String) + Send + Sync;

/// A chat request for the local engine. Always streamed.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// An acquired engine that can stream chat completions.
#[async_trait]
pub trait ChatEngine: Send + Sync {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, GenerationError>;

    fn model(&self) -> &str;
}

/// Knows how to bring a [`ChatEngine`] up.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Diagnostic only; never blocks an acquisition attempt.
    fn probe(&self) -> Acceleration;

    async fn load(&self, progress: &ProgressFn) -> Result<Arc<dyn ChatEngine>, EngineAcquisitionError>;
}

/// Hardware acceleration visible to this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceleration {
    Gpu(String),
    CpuOnly,
}

impl fmt::Display for Acceleration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acceleration::Gpu(kind) => write!(f, "GPU ({})", kind),
            Acceleration::CpuOnly => write!(f, "CPU only"),
        }
    }
}

/// Best-effort check for a GPU the engine could use.
pub fn probe_acceleration() -> Acceleration {
    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        return Acceleration::Gpu("Apple Metal".to_string());
    }
    let devices = [
        ("/dev/nvidiactl", "NVIDIA CUDA"),
        ("/dev/kfd", "AMD ROCm"),
        ("/dev/dri/renderD128", "DRM render node"),
    ];
    devices
        .iter()
        .find(|(path, _)| Path::new(path).exists())
        .map(|(_, kind)| Acceleration::Gpu(kind.to_string()))
        .unwrap_or(Acceleration::CpuOnly)
}

/// Shared, read-only handle to a ready engine.
#[derive(Clone)]
pub struct EngineHandle(Arc<dyn ChatEngine>);

impl EngineHandle {
    pub async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, GenerationError> {
        self.0.stream_chat(request).await
    }

    pub fn model(&self) -> &str {
        self.0.model()
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EngineHandle").field(&self.model()).finish()
    }
}

#[derive(Debug, Clone)]
pub enum EngineState {
    NotStarted,
    Loading {
        progress: String,
        acceleration: Option<Acceleration>,
    },
    Ready(EngineHandle),
    Failed(String),
}

impl EngineState {
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineState::Ready(_))
    }

    /// One line for the status bar.
    pub fn status_text(&self) -> String {
        match self {
            EngineState::NotStarted => "Local engine not loaded".to_string(),
            EngineState::Loading { progress, acceleration: Some(accel) } => {
                format!("{} [{}]", progress, accel)
            }
            EngineState::Loading { progress, acceleration: None } => progress.clone(),
            EngineState::Ready(handle) => format!("Local engine ready ({})", handle.model()),
            EngineState::Failed(message) => message.clone(),
        }
    }
}

/// Proof that the user confirmed the download. Only the confirmation
/// prompt (or an explicit command-line opt-in) should build one.
#[derive(Debug)]
pub struct UserConsent(());

impl UserConsent {
    pub fn given() -> Self {
        UserConsent(())
    }
}

/// Owns [`EngineState`]; everyone else only reads it.
#[derive(Clone)]
pub struct EngineManager {
    state: Arc<watch::Sender<EngineState>>,
    loader: Arc<dyn EngineLoader>,
}

impl EngineManager {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        let (state, _) = watch::channel(EngineState::NotStarted);
        Self { state: Arc::new(state), loader }
    }

    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    pub fn handle(&self) -> Option<EngineHandle> {
        match &*self.state.borrow() {
            EngineState::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Move to `Loading` if nothing is loaded or the last attempt failed.
    ///
    /// Returns `None` while a load is in flight or once ready; the caller
    /// spawns the returned [`EngineLoad`].
    pub fn begin_load(&self, _consent: UserConsent) -> Option<EngineLoad> {
        let started = self.state.send_if_modified(|state| match state {
            EngineState::NotStarted | EngineState::Failed(_) => {
                *state = EngineState::Loading {
                    progress: "Preparing local engine...".to_string(),
                    acceleration: None,
                };
                true
            }
            EngineState::Loading { .. } | EngineState::Ready(_) => false,
        });

        started.then(|| EngineLoad { manager: self.clone() })
    }

    /// `begin_load` followed by the load itself.
    pub async fn load(&self, consent: UserConsent) -> EngineState {
        if let Some(load) = self.begin_load(consent) {
            load.run().await;
        }
        self.state()
    }
}

/// An accepted acquisition attempt. Dropping it before the engine is
/// ready (panic, abort, never run) leaves the state `Failed`, never `Loading`.
pub struct EngineLoad {
    manager: EngineManager,
}

impl Drop for EngineLoad {
    fn drop(&mut self) {
        let abandoned = self.manager.state.send_if_modified(|state| {
            if matches!(state, EngineState::Loading { .. }) {
                *state = EngineState::Failed(ENGINE_UNSUPPORTED.to_string());
                true
            } else {
                false
            }
        });
        if abandoned {
            warn!("local engine acquisition ended without a result");
        }
    }
}

impl EngineLoad {
    pub async fn run(self) {
        let state = self.manager.state.clone();

        let acceleration = self.manager.loader.probe();
        match &acceleration {
            Acceleration::Gpu(kind) => info!(gpu = %kind, "hardware acceleration available"),
            Acceleration::CpuOnly => warn!("no GPU detected, local inference will run on CPU"),
        }
        state.send_modify(|s| {
            if let EngineState::Loading { acceleration: slot, .. } = s {
                *slot = Some(acceleration.clone());
            }
        });

        let progress_state = state.clone();
        let progress = move |text: String| {
            progress_state.send_modify(|s| {
                if let EngineState::Loading { progress, .. } = s {
                    *progress = text;
                }
            });
        };

        match self.manager.loader.load(&progress).await {
            Ok(engine) => {
                info!(model = engine.model(), "local engine ready");
                state.send_replace(EngineState::Ready(EngineHandle(engine)));
            }
            Err(err) => {
                warn!(error = %err, "local engine acquisition failed");
                state.send_replace(EngineState::Failed(ENGINE_UNSUPPORTED.to_string()));
            }
        }
    }
}
