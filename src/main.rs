//! CLI entry point for the Pixiv backup daemon.
//!
//! Thin shell over `pixiv_backup_core`: parses arguments, wires the nine
//! components together for whichever subcommand was requested, and leaves
//! all the actual backup logic to the library (§10.5).

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pixiv_backup_core::{
    AuthSession, ConfigSnapshot, Database, Downloader, HttpClient, MetadataStore, PixivApi,
    RuntimeStatus, ScanCursorState, Scheduler, StopSignal, TaskQueue, UpstreamApi,
};
use tracing::info;

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let wants_file_log =
        matches!(args.command, Some(Command::Start { .. })) || (args.command.is_none() && args.daemon);
    let logs_dir = if wants_file_log {
        let config = ConfigSnapshot::load(&args.config)
            .with_context(|| format!("failed to load config {}", args.config.display()))?;
        Some(config.logs_dir())
    } else {
        None
    };
    init_tracing(&args, logs_dir);

    let result = if let Some(command) = &args.command {
        dispatch(&args.config, command).await
    } else if args.daemon {
        run_daemon(&args.config, false).await
    } else {
        print_status(&args.config)
    };

    if let Err(err) = &result {
        tracing::error!(error = %err, "command failed");
    }
    result
}

async fn dispatch(config_path: &Path, command: &Command) -> Result<()> {
    match command {
        Command::Start { force_run } => run_daemon(config_path, *force_run).await,
        Command::Stop => stop_daemon(),
        Command::Restart => restart_daemon(),
        Command::Status => print_status(config_path),
        Command::Test => test_connectivity(config_path).await,
        Command::Trigger => trigger(config_path),
        Command::Run { count } => run_once(config_path, *count).await,
        Command::Log { lines, no_follow, file, syslog } => {
            tail_log(config_path, *lines, *no_follow, *file, *syslog)
        }
        Command::Repair { check, apply } => repair(*check, *apply),
    }
}

/// Everything a round needs, assembled from a config path (§6.4, §9).
struct Stack {
    config: ConfigSnapshot,
    auth: AuthSession,
    api: Box<dyn UpstreamApi>,
    metadata: MetadataStore,
    downloader: Downloader,
    queue: TaskQueue,
    cursor: ScanCursorState,
}

async fn build_stack(config_path: &Path) -> Result<Stack> {
    let config = ConfigSnapshot::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    std::fs::create_dir_all(config.data_dir())
        .with_context(|| format!("failed to create {}", config.data_dir().display()))?;

    let client = reqwest::Client::new();
    let auth = AuthSession::new(client.clone(), config.token_path(), config.refresh_token.clone())
        .context("failed to initialize auth session")?;
    let api: Box<dyn UpstreamApi> = Box::new(PixivApi::new(client));

    let db = Database::new(&config.db_path())
        .await
        .with_context(|| format!("failed to open {}", config.db_path().display()))?;
    let metadata = MetadataStore::new(db);

    let downloader = Downloader::new(HttpClient::new(config.timeout));
    let queue = TaskQueue::load(&config.queue_path()).context("failed to load task queue")?;
    let cursor = pixiv_backup_core::atomic_write::read_json(&config.cursor_path())
        .context("failed to load scan cursor")?
        .unwrap_or_default();

    Ok(Stack { config, auth, api, metadata, downloader, queue, cursor })
}

fn touch_force_run_flag(config: &ConfigSnapshot) -> Result<()> {
    std::fs::create_dir_all(config.data_dir())?;
    std::fs::write(config.force_run_flag_path(), b"").context("failed to create force-run sentinel")
}

fn spawn_stop_handler(stop: Arc<StopSignal>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, finishing in-flight work");
            stop.request_stop();
        }
    });
}

async fn run_daemon(config_path: &Path, force_run: bool) -> Result<()> {
    let stack = build_stack(config_path).await?;
    if force_run {
        touch_force_run_flag(&stack.config)?;
    }

    let stop = Arc::new(StopSignal::new());
    spawn_stop_handler(Arc::clone(&stop));

    let mut scheduler = Scheduler::new(
        stack.config,
        stack.auth,
        stack.api,
        stack.metadata,
        stack.downloader,
        stack.queue,
        stack.cursor,
        stop,
    );
    scheduler.run().await.context("scheduler loop exited with an error")
}

/// Runs exactly one round with `count` as the round's download budget, then
/// returns. Reuses [`Scheduler::run`] rather than reaching into its private
/// round-level method: pre-requesting a stop makes the outer loop execute
/// the round once, publish the final status, and return (§4.9).
async fn run_once(config_path: &Path, count: u32) -> Result<()> {
    let mut stack = build_stack(config_path).await?;
    stack.config.max_downloads = count;

    let stop = Arc::new(StopSignal::new());
    stop.request_stop();

    let mut scheduler = Scheduler::new(
        stack.config,
        stack.auth,
        stack.api,
        stack.metadata,
        stack.downloader,
        stack.queue,
        stack.cursor,
        stop,
    );
    scheduler.run().await.context("round failed")
}

fn stop_daemon() -> Result<()> {
    println!("process supervision is external to this daemon (see spec §1); nothing to do here");
    Ok(())
}

fn restart_daemon() -> Result<()> {
    println!("process supervision is external to this daemon (see spec §1); nothing to do here");
    Ok(())
}

fn repair(check: bool, apply: bool) -> Result<()> {
    let _ = (check, apply);
    println!("repair/diagnose is an external tool (see spec §1); nothing to do here");
    Ok(())
}

fn trigger(config_path: &Path) -> Result<()> {
    let config = ConfigSnapshot::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    touch_force_run_flag(&config)?;
    println!("force-trigger sentinel dropped, a running daemon will pick it up on its next wait-phase poll");
    Ok(())
}

fn print_status(config_path: &Path) -> Result<()> {
    let config = ConfigSnapshot::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let status: Option<RuntimeStatus> =
        pixiv_backup_core::atomic_write::read_json(&config.status_path())
            .context("failed to read status snapshot")?;
    match status {
        Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
        None => println!("no status published yet"),
    }
    Ok(())
}

async fn test_connectivity(config_path: &Path) -> Result<()> {
    let config = ConfigSnapshot::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let client = reqwest::Client::new();
    let auth = AuthSession::new(client, config.token_path(), config.refresh_token.clone())
        .context("failed to initialize auth session")?;
    auth.ensure_fresh()
        .await
        .context("failed to exchange the refresh token against the upstream")?;
    println!("config valid, upstream reachable and authenticated");
    Ok(())
}

fn tail_log(config_path: &Path, lines: usize, no_follow: bool, file: bool, syslog: bool) -> Result<()> {
    let _ = file;
    if syslog {
        println!("reading the syslog sink is handled by the external log follower (see spec §1)");
        return Ok(());
    }
    let config = ConfigSnapshot::load(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let log_path = todays_log_path(&config.logs_dir());

    let mut seen = print_tail(&log_path, lines)?;
    if no_follow {
        return Ok(());
    }
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
        seen = print_appended(&log_path, seen)?;
    }
}

fn todays_log_path(logs_dir: &Path) -> PathBuf {
    logs_dir.join(format!("pixiv-backup-{}.log", chrono::Utc::now().format("%Y%m%d")))
}

fn print_tail(path: &Path, lines: usize) -> Result<u64> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    for line in &all[start..] {
        println!("{line}");
    }
    Ok(content.len() as u64)
}

fn print_appended(path: &Path, from_byte: u64) -> Result<u64> {
    use std::io::{Read, Seek, SeekFrom};
    let Ok(mut file) = std::fs::File::open(path) else {
        return Ok(from_byte);
    };
    let len = file.metadata()?.len();
    if len < from_byte {
        // Rotated to a new day's file or truncated; start over from the top.
        return print_tail(path, usize::MAX);
    }
    file.seek(SeekFrom::Start(from_byte))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    print!("{buf}");
    Ok(len)
}

fn init_tracing(args: &Args, log_dir: Option<PathBuf>) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "pixiv_backup_core={default_level},pixiv_backup={default_level}"
        ))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_dir {
        Some(dir) => {
            let writer = AuditLogWriter { dir };
            builder.with_writer(move || writer.clone()).init();
        }
        None => builder.init(),
    }
}

/// Duplicates formatted log lines to stdout and to the day's audit log file
/// under `<output_dir>/data/logs/` (§4.8). Reopens the file on every write
/// rather than holding a handle open, so a log rotated or deleted out from
/// under the process is simply recreated on the next line.
#[derive(Clone)]
struct AuditLogWriter {
    dir: PathBuf,
}

impl std::io::Write for AuditLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stdout().write_all(buf)?;
        std::fs::create_dir_all(&self.dir)?;
        let path = todays_log_path(&self.dir);
        std::fs::OpenOptions::new().create(true).append(true).open(path)?.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}
