use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use folio_core::{
    Backend, Config, Conversation, EngineManager, LocalBackend, OllamaClient, OllamaLoader,
    RemoteBackend, RemoteClient, ReplyBackend, UserConsent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Chat with a portfolio assistant backed by a RAG server or a local model")]
#[command(version)]
struct Cli {
    /// Where answers are generated: "remote" (server) or "local" (Ollama)
    #[arg(short, long)]
    backend: Option<String>,

    /// Base URL of the RAG server
    #[arg(long)]
    base_url: Option<String>,

    /// Base URL of the local Ollama daemon
    #[arg(long)]
    ollama_url: Option<String>,

    /// Model used by the local backend
    #[arg(short, long)]
    model: Option<String>,

    /// Skip the download prompt and load the local engine right away
    #[arg(short, long)]
    yes: bool,

    /// Write the effective settings back to the config file
    #[arg(long)]
    save: bool,

    /// Log file (defaults to the user cache directory)
    #[arg(long, env = "FOLIO_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_file.as_deref())?;

    let mut config = Config::load().unwrap_or_else(|err| {
        warn!(error = %err, "ignoring unreadable config file");
        Config::new()
    });
    config.apply_env();
    apply_cli(&mut config, &cli);
    let backend = config.backend()?;

    if cli.save {
        config.save()?;
        info!(path = %Config::get_config_path()?.display(), "config saved");
    }

    let http = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()
        .context("building HTTP client")?;
    let remote = RemoteClient::with_client(http.clone(), config.base_url());

    // Diagnostic only; turns report their own failures
    let probe = remote.clone();
    tokio::spawn(async move {
        match probe.health().await {
            Ok(status) => info!(base_url = probe.base_url(), status, "server reachable"),
            Err(err) => warn!(base_url = probe.base_url(), error = %err, "server health check failed"),
        }
    });

    let (reply_backend, engine): (Arc<dyn ReplyBackend>, Option<EngineManager>) = match backend {
        Backend::Remote => (Arc::new(RemoteBackend::new(remote)), None),
        Backend::Local => {
            let ollama = OllamaClient::with_client(http, config.ollama_url());
            let engine = EngineManager::new(Arc::new(OllamaLoader::new(ollama, config.model())));
            let local = LocalBackend::new(Arc::new(remote), engine.clone())
                .with_temperature(config.temperature());
            (Arc::new(local), Some(engine))
        }
    };

    let model = match backend {
        Backend::Remote => config.base_url().to_string(),
        Backend::Local => config.model().to_string(),
    };
    info!(backend = backend.as_str(), model, "starting");

    let conversation = Conversation::new(config.greeting(), reply_backend);
    let mut app = App::new(conversation, backend, engine.clone(), &model);

    let events = EventHandler::new();
    events.watch_transcript(app.conversation.transcript());
    if let Some(engine) = engine {
        events.watch_engine(&engine);
        if cli.yes {
            app.start_engine_load(engine, UserConsent::given());
        } else {
            app.request_engine_load();
        }
    }

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, &mut app, events).await;
    tui::restore()?;

    info!("exiting");
    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App, mut events: EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event)?,
            None => break,
        }
    }
    Ok(())
}

fn apply_cli(config: &mut Config, cli: &Cli) {
    if let Some(backend) = &cli.backend {
        config.backend = Some(backend.clone());
    }
    if let Some(url) = &cli.base_url {
        config.base_url = Some(url.clone());
    }
    if let Some(url) = &cli.ollama_url {
        config.ollama_url = Some(url.clone());
    }
    if let Some(model) = &cli.model {
        config.model = Some(model.clone());
    }
}

/// The terminal belongs to the TUI, so logs go to a file.
fn init_logging(log_file: Option<&Path>) -> Result<WorkerGuard> {
    let path = match log_file {
        Some(path) => path.to_path_buf(),
        None => dirs::cache_dir()
            .ok_or_else(|| anyhow!("Could not determine cache directory"))?
            .join("folio")
            .join("folio.log"),
    };
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("log file path {} has no file name", path.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("folio=info,folio_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .init();

    Ok(guard)
}
