use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Parser;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tokio::runtime::Handle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use voxtake::{
    load_script, tui, AudioBackendFactory, AudioSource, Config, RecordingSession, SessionConfig,
    SessionStore, StoreError, TakeController,
};

/// Record voice-over takes against a script
#[derive(Parser, Debug)]
#[command(name = "voxtake", version, about)]
struct Args {
    /// Markdown script to record
    #[arg(long, value_name = "PATH", required_unless_present_any = ["list", "show"])]
    script: Option<PathBuf>,

    /// List recorded sessions and exit
    #[arg(long)]
    list: bool,

    /// Print the chunks and takes of a recorded session and exit
    #[arg(long, value_name = "ID")]
    show: Option<String>,

    /// Session identifier (default: script name and start time)
    #[arg(long, value_name = "ID")]
    session: Option<String>,

    /// Capture from a WAV file instead of the microphone
    #[arg(long, value_name = "WAV")]
    input_file: Option<PathBuf>,

    /// Directory holding recorded sessions
    #[arg(long, value_name = "DIR")]
    sessions_dir: Option<PathBuf>,

    /// Configuration file (default: config/voxtake.toml if present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            tui::restore_terminal();
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let cfg = Config::load(args.config.as_deref())?;
    init_logging(&cfg)?;
    install_panic_hook();

    info!("voxtake v{}", env!("CARGO_PKG_VERSION"));

    let root = match args.sessions_dir {
        Some(dir) => dir,
        None => cfg.sessions_root()?,
    };
    let store = SessionStore::new(root).with_take_export(cfg.sessions.export_good_takes);

    if args.list {
        return list_sessions(&store);
    }
    if let Some(id) = args.show {
        return show_session(&store, &id);
    }

    let script = args.script.context("--script is required")?;

    let swept = store.sweep_staging()?;
    if swept > 0 {
        info!("Cleaned up {} interrupted saves", swept);
    }

    let document = load_script(&script)?;

    let session_id = args
        .session
        .unwrap_or_else(|| SessionConfig::default_id(&script, Local::now()));
    let backend_config = cfg.backend_config();

    let source = match args.input_file {
        Some(path) => AudioSource::File(path),
        None => AudioSource::Microphone {
            device: cfg.audio.input_device.clone(),
        },
    };
    let backend = AudioBackendFactory::create(source, backend_config.clone())
        .context("Failed to create audio input")?;

    let output_device = cfg.audio.output_device.clone();
    let output_config = backend_config.clone();
    let output = tokio::task::spawn_blocking(move || {
        AudioBackendFactory::create_output(output_device, output_config)
    })
    .await
    .context("Output device task panicked")?
    .context("Failed to open audio output")?;

    let session = RecordingSession::start(
        SessionConfig::new(session_id, Some(script), backend_config),
        backend,
        output,
        store,
    )
    .await?;

    let controller = TakeController::new(document, session.buffer().clone());
    let runtime = Handle::current();

    let stats = tokio::task::spawn_blocking(move || tui::run(session, controller, runtime))
        .await
        .context("Session UI panicked")??;

    println!("{}", stats);

    Ok(())
}

fn list_sessions(store: &SessionStore) -> Result<()> {
    match store.list() {
        Ok(ids) => {
            for id in ids {
                println!("{}", id);
            }
            Ok(())
        }
        Err(StoreError::RootMissing(root)) => {
            println!("Sessions directory {} does not exist.", root.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn show_session(store: &SessionStore, id: &str) -> Result<()> {
    let manifest = store.manifest(id)?;
    let seconds = |samples: usize| {
        samples as f64 / (manifest.sample_rate as f64 * manifest.channels.max(1) as f64)
    };

    println!("Session:  {}", manifest.id);
    if let Some(script) = &manifest.script {
        println!("Script:   {}", script.display());
    }
    println!("Created:  {}", manifest.created_at.with_timezone(&Local));
    println!(
        "Audio:    {:.1}s, {} Hz, {} channel(s)",
        manifest.duration_secs(),
        manifest.sample_rate,
        manifest.channels
    );

    for chunk in manifest.document.chunks() {
        println!();
        println!("[{}] {}", chunk.index() + 1, chunk.text());
        for (i, take) in chunk.takes().iter().enumerate() {
            println!(
                "    take {:<2} {:>8.2}s  {:>6.2}s  {}",
                i + 1,
                seconds(take.start),
                seconds(take.len()),
                take.mark
            );
        }
    }

    Ok(())
}

fn init_logging(cfg: &Config) -> Result<()> {
    let path = cfg.log_file()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.logging.level)
            .with_context(|| format!("Invalid logging.level {:?}", cfg.logging.level))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tui::restore_terminal();
        error!("Panic: {}\n{}", info, Backtrace::force_capture());
        eprintln!("{}", info);
    }));
}
