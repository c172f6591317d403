//! murmur console entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config, resolve effective log level (CLI `-v` flags > config)
//!   3. Init logger once
//!   4. Validate config, run local health checks (local/auto modes)
//!   5. Start the connectivity monitor (auto mode)
//!   6. Build the resource manager and its idle reaper
//!   7. Open conversation memory
//!   8. Drive the console until Ctrl-C, EOF or an exit command
//!   9. Cancel background tasks, unload the resident model

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use murmur::assistant::{Assistant, Reply};
use murmur::config::{self, Config, MemoryKind};
use murmur::connectivity::ConnectivityMonitor;
use murmur::error::AppError;
use murmur::health;
use murmur::llm::providers::{self, ollama::OllamaProvider};
use murmur::llm::{BackendMode, ProviderError};
use murmur::logger;
use murmur::memory::{
    BoundedHistory, ConversationMemory, HistoryStore, PersistentHistory, PersistentSettings, make_session_id,
};
use murmur::resources::ModelResourceManager;

type Manager = Arc<ModelResourceManager>;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Optional file.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some(), config.log_file.as_deref())?;

    info!(
        assistant = %config.assistant_name,
        work_dir = %config.work_dir.display(),
        backend = %config.backend,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    for problem in config.validate() {
        warn!(%problem, "config problem");
    }
    let mode = config.backend_mode()?;
    std::fs::create_dir_all(&config.work_dir)?;

    if mode != BackendMode::Cloud {
        let probe = OllamaProvider::new(&config.ollama)?;
        let report = health::check_local_models(&probe, &config.ollama.text_model, &config.ollama.vision_model).await;
        for line in report.summary_lines() {
            info!("health: {line}");
            if args.check_only {
                println!("{line}");
            }
        }
        if report.has_critical_failure() {
            warn!("local inference server is not ready, local requests will fail");
        }
    }
    if args.check_only {
        return Ok(());
    }

    // Ctrl-C, EOF and the exit command all cancel this token.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    let mut background = Vec::new();

    let online = if mode == BackendMode::Auto {
        let monitor = Arc::new(ConnectivityMonitor::new(&config.connectivity)?);
        background.push(monitor.start(shutdown.clone()).await);
        Some(monitor.subscribe())
    } else {
        None
    };

    let cloud = providers::build_cloud(&config.cloud, config.cloud_api_key.clone())?;
    let manager: Manager = Arc::new(
        ModelResourceManager::from_config(&config, cloud, online)?
            .with_eviction_hook(|model| debug!(%model, "model evicted")),
    );
    background.extend(manager.spawn_idle_reaper(shutdown.clone()));

    let memory = open_memory(&config, &manager)?;
    let mut assistant = Assistant::new(manager.clone(), memory);

    print_startup_summary(&config, &manager);
    run_console(&mut assistant, BufReader::new(tokio::io::stdin()), &shutdown).await;

    shutdown.cancel();
    for handle in background {
        handle.await.ok();
    }
    manager.unload_all().await;

    println!("\nBye.");
    let _ = std::io::stdout().flush();
    Ok(())
}

fn open_memory(config: &Config, manager: &Manager) -> Result<ConversationMemory<Manager>, AppError> {
    let m = &config.memory;
    match m.kind {
        MemoryKind::Bounded => Ok(ConversationMemory::Bounded(BoundedHistory::new(m.max_messages))),
        MemoryKind::Persistent => {
            let store = HistoryStore::open(&m.db_path)?;
            let settings = PersistentSettings {
                token_budget: m.token_budget,
                summarize_threshold: m.summarize_threshold,
                restore_messages: m.restore_messages,
            };
            let session_id = make_session_id(&m.session_prefix);
            info!(session = %session_id, db = %m.db_path.display(), "persistent memory ready");
            let history = PersistentHistory::open(store, session_id, settings, manager.clone())?;
            Ok(ConversationMemory::Persistent(history))
        }
    }
}

// ── Console ──────────────────────────────────────────────────────────────────

async fn run_console<R>(assistant: &mut Assistant<Manager>, input: R, shutdown: &CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let input = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("stdin read error: {e}");
                    break;
                }
            },
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let (text, image) = match parse_image_command(input) {
            Some((path, prompt)) => match tokio::fs::read(path).await {
                Ok(bytes) => (prompt, Some(bytes)),
                Err(e) => {
                    println!("Could not read image {}: {e}", path.display());
                    continue;
                }
            },
            None => (input, None),
        };

        // Not raced against shutdown: dropping a request midway would leave
        // its user turn stored without the reply.
        let reply = assistant.respond(text, image.as_deref()).await;

        match reply {
            Ok(Reply::Text { text, .. }) => println!("{text}"),
            Ok(Reply::Exit) => {
                info!("exit requested");
                break;
            }
            Err(e) => {
                error!(error = %e, "request failed");
                println!("{}", degraded_reply(&e));
            }
        }
    }
}

/// `/image <path> [prompt]`. The prompt defaults to a plain description request.
fn parse_image_command(input: &str) -> Option<(&Path, &str)> {
    let rest = input.strip_prefix("/image")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut parts = rest.trim_start().splitn(2, char::is_whitespace);
    let path = parts.next().filter(|p| !p.is_empty())?;
    let prompt = parts.next().map(str::trim).filter(|p| !p.is_empty()).unwrap_or("describe this");
    Some((Path::new(path), prompt))
}

fn degraded_reply(e: &AppError) -> &'static str {
    match e {
        AppError::Provider(ProviderError::Unavailable { .. }) | AppError::Provider(ProviderError::Transient(_)) => {
            "Sorry, I can't reach my language model right now. Please try again in a moment."
        }
        AppError::Provider(ProviderError::Permanent { status: 401, .. }) => {
            "Sorry, the cloud service rejected my API key."
        }
        AppError::Provider(_) => "Sorry, I had trouble thinking about that.",
        _ => "Sorry, something went wrong saving our conversation.",
    }
}

fn print_startup_summary(config: &Config, manager: &Manager) {
    println!("─────────────────────────────────────────────");
    println!(" {}  (Ctrl-C or \"exit\" to quit)", config.assistant_name);
    println!("   backend  {}", manager.mode());
    println!("   text     {}", manager.text_model());
    println!("   vision   {}", manager.active_vision_model());
    println!("   memory   {:?}", config.memory.kind);
    println!(" /image <path> [prompt] attaches a JPEG");
    println!("─────────────────────────────────────────────");
}

// ── CLI ──────────────────────────────────────────────────────────────────────

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    check_only: bool,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut check_only = false;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: murmur [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("      --check                Run local health checks and exit");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "--check" => check_only = true,
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    //   -v     warn
    //   -vv    info
    //   -vvv   debug
    //   -vvvv+ trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path, check_only }
}
