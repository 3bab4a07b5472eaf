//! CLI binary for case-asset-sync.
//!
//! A thin shim over the library crate: maps flags to `SyncConfig`, wires
//! the production stores together and prints the run report.

use anyhow::{bail, Context, Result};
use case_asset_sync::store::hub::{HubBackupStore, DEFAULT_HUB_ENDPOINT};
use case_asset_sync::store::object::{FilesystemObjectStore, HttpObjectStore};
use case_asset_sync::store::postgres::PgCaseRepository;
use case_asset_sync::{
    Backoff, BackupReport, BackupSynchronizer, BatchScheduler, CaseRepository, HttpImageSource,
    ObjectStore, ProgressCallback, RetryPolicy, RunReport, SyncConfig, SyncProgressCallback,
    DEFAULT_BASE_ORIGIN,
};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the claimed cases plus a log
/// line per case and per backup commit.
struct CliProgressCallback {
    bar: ProgressBar,
    case_started: Mutex<Option<Instant>>,
    failed: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Claiming");
        bar.set_message("Selecting pending cases…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            case_started: Mutex::new(None),
            failed: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self) -> String {
        let secs = self
            .case_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl SyncProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_cases: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} cases  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_cases as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Syncing");
        self.bar.set_message("");
        if total_cases > 0 {
            self.bar.println(format!(
                "{} {}",
                cyan("◆"),
                bold(&format!("Processing {total_cases} cases…"))
            ));
        }
    }

    fn on_case_start(&self, case_id: &str, _index: usize, _total: usize) {
        *self
            .case_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.bar.set_message(case_id.to_string());
    }

    fn on_case_complete(&self, case_id: &str, image_count: usize, image_errors: usize) {
        let skipped = if image_errors > 0 {
            format!("  {}", red(&format!("{image_errors} skipped")))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "  {} {:<14} {}{}  {}",
            green("✓"),
            case_id,
            dim(&format!("{image_count:>3} photos")),
            skipped,
            self.elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_case_failed(&self, case_id: &str, error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<14} {}  {}",
            red("✗"),
            case_id,
            red(&msg),
            self.elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_case_skipped(&self, case_id: &str, reason: &str) {
        self.bar.println(format!(
            "  {} {:<14} {}",
            cyan("↷"),
            case_id,
            dim(reason),
        ));
        self.bar.inc(1);
    }

    fn on_backup_flush(&self, images: usize, committed: bool) {
        let (mark, verdict) = if committed {
            (green("⇪"), "mirrored")
        } else {
            (red("⇪"), "backup failed")
        };
        self.bar
            .println(format!("  {mark} {} {verdict}", dim(&format!("{images} photos"))));
    }

    fn on_run_complete(&self, report: &RunReport) {
        self.bar.finish_and_clear();
        if report.cases_claimed == 0 {
            eprintln!("{} Nothing to do: every case is processed", green("✔"));
            return;
        }
        let failed = self.failed.load(Ordering::SeqCst);
        eprintln!(
            "{} {}/{} cases  {} photos  ({} failed)",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&report.cases_completed.to_string()),
            report.cases_claimed,
            bold(&report.images_stored.to_string()),
            if failed == 0 {
                failed.to_string()
            } else {
                red(&failed.to_string())
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process the next three cases, mirroring to a hub dataset
  case-assets --primary dir:/srv/photos --hub-repo owner/case-photos run

  # Bigger batch, shorter per-case budget
  case-assets --primary https://cdn.example.org/photos run --batch-size 20 --case-timeout 45

  # Re-mirror everything that is not backed up yet
  case-assets --primary dir:/srv/photos --hub-repo owner/case-photos backup

  # Progress statistics as JSON
  case-assets --json status

PRIMARY STORE:
  dir:<path>            Files under a local directory (atomic writes)
  http(s)://<endpoint>  PUT/GET <endpoint>/<key>, bearer token from --primary-token

ENVIRONMENT VARIABLES:
  DATABASE_URL               Postgres connection string
  CASE_ASSETS_PRIMARY        Primary store location
  CASE_ASSETS_PRIMARY_TOKEN  Bearer token for an HTTP primary store
  HF_REPO                    Backup dataset repository (owner/name)
  HF_TOKEN                   Backup hub token
  HF_ENDPOINT                Backup hub endpoint
  RUST_LOG                   Overrides the log filter
"#;

/// Extract, normalise, store and mirror the photos embedded in case pages.
#[derive(Parser, Debug)]
#[command(
    name = "case-assets",
    version,
    about = "Extract, normalise, store and mirror the photos embedded in case pages",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    /// Maximum database connections.
    #[arg(long, env = "CASE_ASSETS_DB_CONNECTIONS", global = true, default_value_t = 4)]
    db_connections: u32,

    /// Primary store: `dir:<path>` or an http(s) endpoint.
    #[arg(long, env = "CASE_ASSETS_PRIMARY", global = true)]
    primary: Option<String>,

    /// Bearer token for an HTTP primary store.
    #[arg(long, env = "CASE_ASSETS_PRIMARY_TOKEN", global = true, hide_env_values = true)]
    primary_token: Option<String>,

    /// Backup dataset repository, `owner/name`.
    #[arg(long, env = "HF_REPO", global = true)]
    hub_repo: Option<String>,

    /// Backup hub token.
    #[arg(long, env = "HF_TOKEN", global = true, hide_env_values = true)]
    hub_token: Option<String>,

    /// Backup hub endpoint.
    #[arg(long, env = "HF_ENDPOINT", global = true, default_value = DEFAULT_HUB_ENDPOINT)]
    hub_endpoint: String,

    /// Timeout for one backup commit request, in seconds.
    #[arg(long, env = "CASE_ASSETS_HUB_TIMEOUT", global = true, default_value_t = 300)]
    hub_timeout: u64,

    /// Attempts per backup commit.
    #[arg(long, env = "CASE_ASSETS_BACKUP_ATTEMPTS", global = true, default_value_t = 3)]
    backup_attempts: u32,

    /// Delay between backup attempts, in milliseconds.
    #[arg(long, env = "CASE_ASSETS_BACKUP_DELAY_MS", global = true, default_value_t = 3000)]
    backup_delay_ms: u64,

    /// Grow the backup retry delay linearly instead of keeping it fixed.
    #[arg(long, env = "CASE_ASSETS_BACKUP_INCREMENTAL", global = true)]
    incremental_backoff: bool,

    /// Output a JSON report instead of text.
    #[arg(long, env = "CASE_ASSETS_JSON", global = true)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CASE_ASSETS_NO_PROGRESS", global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CASE_ASSETS_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CASE_ASSETS_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Claim a batch of pending or failed cases and process it.
    Run(RunArgs),
    /// Mirror every asset that is not backed up yet.
    Backup(BackupArgs),
    /// Print processing and backup progress.
    Status,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Cases claimed by this run.
    #[arg(short = 'n', long, env = "CASE_ASSETS_BATCH_SIZE", default_value_t = 3)]
    batch_size: usize,

    /// Wall-clock budget per case, in seconds.
    #[arg(long, env = "CASE_ASSETS_CASE_TIMEOUT", default_value_t = 90)]
    case_timeout: u64,

    /// Per-photo download timeout, in seconds.
    #[arg(long, env = "CASE_ASSETS_DOWNLOAD_TIMEOUT", default_value_t = 15)]
    download_timeout: u64,

    /// Origin relative photo references are resolved against.
    #[arg(long, env = "CASE_ASSETS_BASE_ORIGIN", default_value = DEFAULT_BASE_ORIGIN)]
    base_origin: String,

    /// Queued photos that trigger a backup commit mid-run.
    #[arg(long, env = "CASE_ASSETS_FLUSH_THRESHOLD", default_value_t = 50)]
    flush_threshold: usize,
}

#[derive(Args, Debug)]
struct BackupArgs {
    /// Assets per backup commit.
    #[arg(long, env = "CASE_ASSETS_PAGE_SIZE", default_value_t = 50)]
    page_size: usize,

    /// Pause between pages, in milliseconds.
    #[arg(long, env = "CASE_ASSETS_PAGE_PAUSE_MS", default_value_t = 1000)]
    pause_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during a run.
    let show_progress =
        !cli.quiet && !cli.no_progress && !cli.json && matches!(cli.command, Command::Run(_));
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let database_url = cli
        .database_url
        .as_deref()
        .context("--database-url (or DATABASE_URL) is required")?;
    let repo = Arc::new(
        PgCaseRepository::connect(database_url, cli.db_connections)
            .await
            .context("Failed to connect to the database")?,
    );

    match &cli.command {
        Command::Run(args) => run(&cli, args, repo, show_progress).await,
        Command::Backup(args) => backup(&cli, args, repo).await,
        Command::Status => status(&cli, repo).await,
    }
}

async fn run(
    cli: &Cli,
    args: &RunArgs,
    repo: Arc<PgCaseRepository>,
    show_progress: bool,
) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn SyncProgressCallback>)
    } else {
        None
    };

    let config = build_config(cli, args, progress_cb)?;
    let source = Arc::new(
        HttpImageSource::new(config.download_timeout, &config.user_agent)
            .context("Failed to build HTTP client")?,
    );
    let primary = open_primary(cli)?;
    let backup = open_hub(cli)?;

    let scheduler = BatchScheduler::new(config, repo, source, primary, backup);
    let report = scheduler.run().await.context("Run failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet && !show_progress {
        eprintln!(
            "Completed {}/{} cases, {} photos stored, {} skipped, in {}ms",
            report.cases_completed,
            report.cases_claimed,
            report.images_stored,
            report.image_errors,
            report.duration_ms
        );
    }
    if !cli.quiet && !cli.json {
        print_backup_summary(&report.backup);
    }
    Ok(())
}

async fn backup(cli: &Cli, args: &BackupArgs, repo: Arc<PgCaseRepository>) -> Result<()> {
    let primary = open_primary(cli)?;
    let store = open_hub(cli)?;
    let sync = BackupSynchronizer::new(store, repo, retry_policy(cli));

    let report = sync
        .reconcile(
            primary.as_ref(),
            args.page_size,
            Duration::from_millis(args.pause_ms),
        )
        .await
        .context("Backup reconciliation failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_backup_summary(&report);
    }
    Ok(())
}

async fn status(cli: &Cli, repo: Arc<PgCaseRepository>) -> Result<()> {
    let cases = repo.progress().await.context("Failed to read case progress")?;
    let assets = repo
        .backup_progress()
        .await
        .context("Failed to read backup progress")?;

    if cli.json {
        let json = serde_json::json!({ "cases": cases, "assets": assets });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialise status")?
        );
        return Ok(());
    }

    println!("Cases:        {} total", cases.total);
    println!("  completed:  {}", cases.completed);
    println!("  failed:     {}", cases.failed);
    println!("  remaining:  {}", cases.remaining);
    println!("  progress:   {:.2}%", cases.percent);
    println!("Assets:");
    println!("  backed up:  {}", assets.backed_up);
    println!("  pending:    {}", assets.not_backed_up);
    println!("  failed:     {}", assets.failed);
    Ok(())
}

/// Map CLI args to `SyncConfig`.
fn build_config(
    cli: &Cli,
    args: &RunArgs,
    progress: Option<ProgressCallback>,
) -> Result<SyncConfig> {
    let mut builder = SyncConfig::builder()
        .batch_size(args.batch_size)
        .case_timeout_secs(args.case_timeout)
        .download_timeout_secs(args.download_timeout)
        .base_origin(args.base_origin.clone())
        .backup_flush_threshold(args.flush_threshold)
        .backup_retry(retry_policy(cli));

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn retry_policy(cli: &Cli) -> RetryPolicy {
    RetryPolicy {
        max_attempts: cli.backup_attempts.max(1),
        delay: Duration::from_millis(cli.backup_delay_ms),
        backoff: if cli.incremental_backoff {
            Backoff::Incremental
        } else {
            Backoff::Fixed
        },
    }
}

/// Parse `--primary` into an object store.
fn open_primary(cli: &Cli) -> Result<Arc<dyn ObjectStore>> {
    let Some(target) = cli.primary.as_deref() else {
        bail!("--primary (or CASE_ASSETS_PRIMARY) is required");
    };

    if let Some(path) = target.strip_prefix("dir:") {
        if path.is_empty() {
            bail!("--primary dir: needs a path");
        }
        return Ok(Arc::new(FilesystemObjectStore::new(path)));
    }

    if target.starts_with("http://") || target.starts_with("https://") {
        let store = HttpObjectStore::new(target, cli.primary_token.clone(), Duration::from_secs(60))
            .context("Failed to build primary store client")?;
        return Ok(Arc::new(store));
    }

    bail!("Unrecognised --primary '{target}': use dir:<path> or an http(s) URL")
}

fn open_hub(cli: &Cli) -> Result<Arc<HubBackupStore>> {
    let repo = cli
        .hub_repo
        .as_deref()
        .context("--hub-repo (or HF_REPO) is required")?;
    let token = cli
        .hub_token
        .as_deref()
        .context("--hub-token (or HF_TOKEN) is required")?;
    let store = HubBackupStore::new(
        &cli.hub_endpoint,
        repo,
        token,
        Duration::from_secs(cli.hub_timeout),
    )
    .context("Invalid backup hub settings")?;
    Ok(Arc::new(store))
}

fn print_backup_summary(report: &BackupReport) {
    if report.batches == 0 && report.failed == 0 {
        eprintln!("{}", dim("No photos to mirror"));
        return;
    }
    eprintln!(
        "{} {} mirrored, {} failed  {}",
        if report.failed == 0 { green("⇪") } else { red("⇪") },
        bold(&report.committed.to_string()),
        report.failed,
        dim(&format!(
            "({} commits, {} attempts)",
            report.batches, report.attempts
        )),
    );
}
