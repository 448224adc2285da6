//! tron-lsp - headless driver for the language server client.
//!
//! Starts one language server, performs the handshake, runs a single
//! query against a file, and shuts the server down again:
//!
//! ```text
//! main() -> start -> initialize -> openDocument -> query -> terminate
//! ```

mod config;

use std::{
    env,
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tron_lsp::{LanguageTable, LspClient, LspConfig, LspEvent, ServerConfig, document_uri};

use crate::config::TronConfig;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Shell convention for a process ended by SIGINT (128 + 2).
const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "tron-lsp", version, about = "Drive a language server from the shell")]
struct Cli {
    /// Workspace root sent to the server. Defaults to the current directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Language server command; overrides `[lsp.server]` in the config file.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Argument for `--server`. Repeatable.
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Log to stderr instead of the log file.
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the diagnostics the server publishes for FILE.
    Diagnostics {
        file: PathBuf,
        /// How long to wait for the first publish.
        #[arg(long, default_value_t = 3000)]
        wait_ms: u64,
    },
    /// Print completion candidates at LINE:COL (1-indexed).
    Complete { file: PathBuf, line: u32, col: u32 },
    /// Print the definition of the symbol at LINE:COL (1-indexed).
    Definition { file: PathBuf, line: u32, col: u32 },
}

impl Command {
    fn file(&self) -> &Path {
        match self {
            Command::Diagnostics { file, .. }
            | Command::Complete { file, .. }
            | Command::Definition { file, .. } => file,
        }
    }
}

fn init_tracing(log_stderr: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if log_stderr {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr))
            .with(env_filter)
            .init();
        return;
    }

    let (log_file, init_warnings) = open_tron_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Query output goes to stdout; keep it clean when there is no log file.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_tron_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in tron_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn tron_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.tron/logs/tron.log
    if let Some(config_path) = TronConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("tron.log"));
    }

    // Fallback: ./.tron/logs/tron.log
    candidates.push(PathBuf::from(".tron").join("logs").join("tron.log"));

    candidates
}

/// Command-line flags win over the config file.
fn resolve_server(cli: &Cli, lsp: &LspConfig) -> Result<ServerConfig> {
    if let Some(command) = &cli.server {
        let mut server = ServerConfig::new(command.clone(), cli.args.clone());
        if let Some(configured) = &lsp.server {
            server.shutdown_grace_ms = configured.shutdown_grace_ms;
        }
        return Ok(server);
    }

    match &lsp.server {
        Some(_) if !lsp.enabled => {
            bail!("language server is disabled in config; set lsp.enabled = true or pass --server")
        }
        Some(server) => Ok(server.clone()),
        None => bail!("no language server configured; pass --server or add [lsp.server] to the config"),
    }
}

/// 1-indexed user input → zero-based protocol position.
fn zero_based(value: u32) -> u32 {
    value.saturating_sub(1)
}

async fn wait_for_diagnostics(
    events: &mut mpsc::Receiver<LspEvent>,
    uri: &str,
    wait: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Err(_) => {
                tracing::debug!(uri, "No diagnostics before deadline");
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(LspEvent::Diagnostics { uri: published, .. })) if published == uri => {
                return Ok(());
            }
            Ok(Some(LspEvent::Diagnostics { .. })) => {}
            Ok(Some(LspEvent::ServerStopped { reason })) => {
                bail!("language server stopped: {reason:?}")
            }
        }
    }
}

async fn run_query(
    client: &LspClient,
    root: &Path,
    command: &Command,
    events: &mut mpsc::Receiver<LspEvent>,
) -> Result<()> {
    client
        .initialize(root)
        .await
        .context("initializing language server")?;

    let file = command.file();
    let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    client.open_document(file, &text).await?;

    match command {
        Command::Diagnostics { wait_ms, .. } => {
            let uri = document_uri(file)?;
            wait_for_diagnostics(events, &uri, Duration::from_millis(*wait_ms)).await?;
            let diagnostics = client.diagnostics(&uri);
            if diagnostics.is_empty() {
                println!("no diagnostics");
            }
            for diagnostic in diagnostics {
                println!("{}", diagnostic.display_with_path(file));
            }
        }
        Command::Complete { line, col, .. } => {
            let items = client
                .completions(file, zero_based(*line), zero_based(*col))
                .await
                .context("requesting completions")?;
            for item in items {
                match &item.detail {
                    Some(detail) => println!("{}\t{detail}", item.label),
                    None => println!("{}", item.label),
                }
            }
        }
        Command::Definition { line, col, .. } => {
            let location = client
                .definition(file, zero_based(*line), zero_based(*col))
                .await
                .context("requesting definition")?;
            match location {
                Some(location) => {
                    let target = location
                        .path()
                        .map_or_else(|| location.uri.clone(), |p| p.display().to_string());
                    println!(
                        "{target}:{}:{}",
                        location.range.start.line + 1,
                        location.range.start.character + 1
                    );
                }
                None => println!("no definition found"),
            }
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum QueryOutcome {
    Completed,
    Interrupted,
}

impl QueryOutcome {
    fn exit_code(&self) -> ExitCode {
        match self {
            QueryOutcome::Completed => ExitCode::SUCCESS,
            QueryOutcome::Interrupted => ExitCode::from(INTERRUPTED_EXIT_CODE),
        }
    }
}

/// Run `query` unless `interrupt` fires first.
async fn until_interrupted(
    query: impl Future<Output = Result<()>>,
    interrupt: impl Future<Output = io::Result<()>>,
) -> Result<QueryOutcome> {
    tokio::select! {
        outcome = query => outcome.map(|()| QueryOutcome::Completed),
        _ = interrupt => {
            tracing::info!("Interrupted");
            Ok(QueryOutcome::Interrupted)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_stderr);

    let config = TronConfig::load()?.unwrap_or_default();
    let lsp = config.lsp.unwrap_or_default();
    let server = resolve_server(&cli, &lsp)?;
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => env::current_dir().context("resolving current directory")?,
    };

    let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let mut client = LspClient::new(server.clone(), LanguageTable::with_overrides(&lsp.languages))
        .with_event_sender(events_tx);
    client
        .start(&root)
        .with_context(|| format!("starting {}", server.command))?;
    let pid = client.process_id().await;
    tracing::debug!(pid, "Language server running");

    let outcome = until_interrupted(
        run_query(&client, &root, &cli.command, &mut events_rx),
        tokio::signal::ctrl_c(),
    )
    .await;

    let status = client.terminate().await;
    tracing::info!(?status, "Language server terminated");
    outcome.map(|outcome| outcome.exit_code())
}
