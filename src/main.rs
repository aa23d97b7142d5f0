//! Command-line interface for web2mp3.

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use web2mp3::daemon::LockKind;
use web2mp3::logging::{self, LogTarget, MAX_LOG_FILES};
use web2mp3::matching::operator::input_is;
use web2mp3::{
    Config, ConsoleOperator, Coordinator, HttpCoverFetcher, InitDaemons, Library, LockDir,
    LoftyTagWriter, Operator, ProviderRegistry, Resolver, Result, SlotMode, SortBy, TaskExecutor,
    TaskIndex, Uri, Worker, WorkerOptions, YtDlp, YtDlpFetcher,
};

#[derive(Parser)]
#[command(name = "web2mp3")]
#[command(about = "Resolve music links into tagged MP3 downloads")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config_dir>/web2mp3/config.toml)
    #[arg(long, global = true, env = "WEB2MP3_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match references and queue their downloads
    Get(GetArgs),
    /// Run a download worker
    Daemon {
        /// Download in the foreground, logging to the terminal
        #[arg(short = 'v', long)]
        foreground: bool,
        /// In the foreground, continue after the first task
        #[arg(short = 'c', long, requires = "foreground")]
        continuous: bool,
        /// Pool size for background slots (default: daemon.max_daemons)
        #[arg(short = 'x', long)]
        max_daemons: Option<usize>,
    },
    /// Inspect and edit the task index
    Index {
        #[command(subcommand)]
        command: IndexCommand,
    },
    /// Inspect and reclaim daemon locks
    Locks {
        #[command(subcommand)]
        command: LocksCommand,
    },
}

#[derive(Args, Clone)]
struct GetArgs {
    /// Track, album or playlist URLs
    urls: Vec<String>,

    /// Response when no clear match is found: a 1-based index or "Abort"
    #[arg(short, long)]
    response: Option<String>,

    /// Maximum number of daemons
    #[arg(short = 'x', long)]
    max_daemons: Option<usize>,

    /// Exit when the arguments have been processed
    #[arg(long)]
    headless: bool,

    /// When to start daemons
    #[arg(short, long, value_enum, default_value_t = InitDaemons::During)]
    init_daemons: InitDaemons,

    /// Duration difference threshold
    #[arg(short, long)]
    tolerance: Option<f64>,

    /// Market (region) code for searches
    #[arg(short, long)]
    market: Option<String>,

    /// Candidates to check for a match
    #[arg(short = 'l', long)]
    search_limit: Option<usize>,

    /// Ranking key
    #[arg(short, long, value_enum)]
    sort_by: Option<SortBy>,

    /// Queue downloads even when a file with the same title exists
    #[arg(long)]
    allow_duplicates: bool,

    /// Re-add known references and replace existing files
    #[arg(short, long)]
    overwrite: bool,

    /// Audio quality in kbit/s
    #[arg(short, long)]
    quality: Option<u32>,
}

impl GetArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(response) = &self.response {
            config.matching.default_response = Some(response.clone());
        }
        if let Some(n) = self.max_daemons {
            config.daemon.max_daemons = n;
        }
        if let Some(t) = self.tolerance {
            config.matching.duration_tolerance = t;
        }
        if let Some(m) = &self.market {
            config.matching.market = m.clone();
        }
        if let Some(l) = self.search_limit {
            config.matching.search_limit = l;
        }
        if let Some(s) = self.sort_by {
            config.matching.sort_by = s;
        }
        if self.allow_duplicates {
            config.download.avoid_duplicates = false;
        }
        if self.overwrite {
            config.download.overwrite = true;
        }
        if let Some(q) = self.quality {
            config.download.quality = q;
        }
    }
}

#[derive(Subcommand)]
enum IndexCommand {
    /// Processed and pending counts
    Stats,
    /// Pending tasks with their payloads
    List,
    /// Mark an entry as done (sentinel)
    Clear {
        /// Index key, e.g. youtube.dQw4w9WgXcQ
        uri: String,
    },
    /// Forget an entry entirely
    Remove {
        /// Index key, e.g. youtube.dQw4w9WgXcQ
        uri: String,
    },
}

#[derive(Subcommand)]
enum LocksCommand {
    /// Daemon slots and task locks with their age
    List,
    /// Remove orphaned locks left by crashed workers
    Reclaim {
        /// Only remove locks older than this many seconds
        #[arg(long)]
        older_than: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let Cli { config, command } = Cli::parse();
    let mut settings = Config::load(config.as_deref())?;

    match command {
        Commands::Get(args) => {
            logging::init(LogTarget::Stderr)?;
            args.apply(&mut settings);
            settings.validate()?;
            handle_get(settings, config, args).await
        }
        Commands::Daemon {
            foreground,
            continuous,
            max_daemons,
        } => {
            if let Some(n) = max_daemons {
                settings.daemon.max_daemons = n;
            }
            settings.validate()?;
            handle_daemon(settings, foreground, continuous).await
        }
        Commands::Index { command } => {
            logging::init(LogTarget::Stderr)?;
            handle_index(&settings, command).await
        }
        Commands::Locks { command } => {
            logging::init(LogTarget::Stderr)?;
            handle_locks(&settings, command).await
        }
    }
}

async fn handle_get(config: Config, config_path: Option<PathBuf>, args: GetArgs) -> Result<()> {
    if let Err(e) = logging::prune_logs(&config.paths.log_dir, MAX_LOG_FILES) {
        tracing::warn!(error = %e, "Could not prune log directory");
    }

    let ytdlp = Arc::new(YtDlp::from_config(&config.download)?);
    let registry = ProviderRegistry::with_defaults(&config, ytdlp)?;
    let index = TaskIndex::open(&config.paths.index_dir).await?;
    let locks = LockDir::open(&config.paths.lock_dir).await?;
    let operator = Arc::new(ConsoleOperator::new());
    let resolver = Resolver::new(&config, registry, index.clone(), operator.clone());

    let mut daemon_args: Vec<OsString> = Vec::new();
    if let Some(path) = &config_path {
        daemon_args.push("--config".into());
        daemon_args.push(path.clone().into_os_string());
    }
    let coordinator = Coordinator::new(&config, index, locks, std::env::current_exe()?, daemon_args);

    let mut urls = args.urls.clone();
    loop {
        process_references(&resolver, &coordinator, &urls, args.init_daemons).await?;
        if args.headless {
            return Ok(());
        }

        let input = operator.ask(">>> URL or [Abort]?").await?;
        let input = input.trim();
        if input_is("Help", input) {
            Cli::command().print_help()?;
            urls.clear();
        } else if input_is("Params", input) {
            println!("{}", config.to_toml()?);
            urls.clear();
        } else if input.is_empty() || input_is("Abort", input) {
            println!("Bye Bye!");
            return Ok(());
        } else {
            urls = input.split_whitespace().map(str::to_string).collect();
        }
    }
}

async fn process_references(
    resolver: &Resolver,
    coordinator: &Coordinator,
    references: &[String],
    init_daemons: InitDaemons,
) -> Result<()> {
    for reference in references {
        for status in resolver.resolve_reference(reference).await? {
            println!("{status}");
        }
        if init_daemons == InitDaemons::During {
            report_started(coordinator.start_daemons().await?);
        }
    }
    if init_daemons == InitDaemons::After && !references.is_empty() {
        report_started(coordinator.start_daemons().await?);
    }
    Ok(())
}

fn report_started(n: usize) {
    if n > 0 {
        println!("{n} DAEMONs started");
    }
}

async fn handle_daemon(config: Config, foreground: bool, continuous: bool) -> Result<()> {
    let target = if foreground {
        LogTarget::Stderr
    } else {
        LogTarget::File(logging::daemon_log_path(
            &config.paths.log_dir,
            std::process::id(),
        ))
    };
    logging::init(target)?;

    let locks = LockDir::open(&config.paths.lock_dir).await?;
    let mode = if foreground {
        SlotMode::Unbounded
    } else {
        SlotMode::Bounded(config.daemon.max_daemons)
    };
    let Some(slot) = locks.claim_slot(mode).await? else {
        tracing::info!("All daemon slots are taken, exiting");
        return Ok(());
    };

    let ytdlp = Arc::new(YtDlp::from_config(&config.download)?);
    let registry = ProviderRegistry::with_defaults(&config, ytdlp.clone())?;
    let index = TaskIndex::open(&config.paths.index_dir).await?;
    let executor = TaskExecutor::new(
        index,
        Library::new(config.paths.music_dir.clone()),
        registry,
        config.retry.clone(),
        Arc::new(YtDlpFetcher::new(ytdlp)),
        Arc::new(LoftyTagWriter::new()),
        Arc::new(HttpCoverFetcher::new()?),
    );
    let options = WorkerOptions::from_config(&config.daemon, foreground && !continuous);
    let cancel_token = CancellationToken::new();
    let worker = Worker::new(slot, locks, executor, options).with_cancel_token(cancel_token.clone());

    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        web2mp3::shutdown_signal().await;
        tracing::info!("Daemon interrupted, releasing locks");
        signal_token.cancel();
    });

    let report = worker.run().await?;
    for (uri, status) in &report.executed {
        println!("{uri}: {status}");
    }
    if report.drained {
        println!("daemon finished: No unprocessed URIs found.");
    }
    Ok(())
}

async fn handle_index(config: &Config, command: IndexCommand) -> Result<()> {
    let index = TaskIndex::open(&config.paths.index_dir).await?;
    match command {
        IndexCommand::Stats => {
            let stats = index.stats().await?;
            println!("{:<24}{}", "Processed:", stats.processed);
            println!("{:<24}{}", "Unprocessed:", stats.pending);
            println!("{:<24}\"{}\"", "Location:", stats.location.display());
        }
        IndexCommand::List => {
            for uri in index.list_pending().await? {
                let payload = index.read(&uri).await?;
                println!("{uri}");
                if let Some(payload) = payload {
                    println!("{}", serde_json::to_string_pretty(&payload)?);
                }
            }
        }
        IndexCommand::Clear { uri } => {
            let uri = Uri::parse(&uri)?;
            index.clear(&uri).await?;
            println!("Cleared {uri}");
        }
        IndexCommand::Remove { uri } => {
            let uri = Uri::parse(&uri)?;
            if index.remove(&uri).await? {
                println!("Removed {uri}");
            } else {
                println!("{uri} is not in the index");
            }
        }
    }
    Ok(())
}

async fn handle_locks(config: &Config, command: LocksCommand) -> Result<()> {
    let locks = LockDir::open(&config.paths.lock_dir).await?;
    match command {
        LocksCommand::List => {
            for lock in locks.list().await? {
                let what = match &lock.kind {
                    LockKind::Slot(n) => format!("daemon {n}"),
                    LockKind::Task(uri) => format!("task {uri}"),
                    LockKind::Takeover(uri) => format!("takeover {uri}"),
                };
                println!("{what:<40} owner {:<16} age {}s", lock.owner, lock.age.as_secs());
            }
        }
        LocksCommand::Reclaim { older_than } => {
            let removed = locks.reclaim(older_than.map(Duration::from_secs)).await?;
            for lock in &removed {
                println!("Removed {}", lock.path.display());
            }
            println!("{} lock(s) reclaimed", removed.len());
        }
    }
    Ok(())
}
