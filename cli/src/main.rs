mod args;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use mediaq::config::loader::validate_config;
use mediaq::db::migrations;
use mediaq::model::AUTO_SUMMARIZE_KEY;
use mediaq::{
    load_config, BackendRegistry, Config, Database, Dispatcher, JobQueue, NewJob, NewSubmission,
    SubmissionTracker, WorkerPool, WorkerSettings,
};

use crate::args::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let mut config = resolve_config(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.database_path = Some(database.to_string_lossy().into_owned());
    }

    match cli.command {
        Command::Init => init(&config),
        Command::Status { json } => status(&config, json),
        Command::Run {
            poll_interval,
            workers,
            exit_when_empty,
        } => {
            if let Some(secs) = poll_interval {
                config.poll_interval_secs = secs;
            }
            if let Some(count) = workers {
                config.workers = usize::try_from(count).context("worker count too large")?;
            }
            validate_config(&config)?;
            run(config, exit_when_empty).await
        }
        Command::Submit {
            file,
            provider,
            auto_summarize,
            id,
        } => submit(&config, &file, provider, auto_summarize, id),
        Command::Summarize { text, provider } => {
            let queue = JobQueue::new(open_database(&config)?);
            let job_id = queue.enqueue(NewJob::summarize(text, provider))?;
            println!("Queued summarize job {job_id}");
            Ok(())
        }
        Command::Job { id } => {
            let queue = JobQueue::new(open_database(&config)?);
            let job = queue.get_job(id)?.ok_or_else(|| anyhow!("Job {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        Command::Submission { id } => {
            let db = open_database(&config)?;
            let submission = SubmissionTracker::new(db.clone())
                .get_submission(&id)?
                .ok_or_else(|| anyhow!("Submission '{id}' not found"))?;
            let jobs = JobQueue::new(db).jobs_for_submission(&id)?;
            let out = json!({ "submission": submission, "jobs": jobs });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Command::Sweep { older_than } => {
            let queue = JobQueue::new(open_database(&config)?);
            let failed = queue.fail_stale_jobs(Duration::from_secs(older_than))?;
            println!("Failed {} stale job(s)", failed.len());
            Ok(())
        }
    }
}

/// Installs the global subscriber and routes `log` records into it.
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_logging(json: bool) -> anyhow::Result<()> {
    LogTracer::init().map_err(|e| anyhow!("failed to bridge log records: {e}"))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = explicit {
        return load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }

    let default_path = dirs::home_dir().map(|h| h.join(".mediaq").join("config.json"));
    match default_path {
        Some(path) if path.exists() => load_config(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        _ => Ok(Config::default()),
    }
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    let path = config.database_path()?;
    Database::open(&path).with_context(|| format!("failed to open database at {}", path.display()))
}

fn init(config: &Config) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let version = db.with_conn(|conn| migrations::current_version(conn))?;
    println!(
        "Initialized database at {} (schema version {version})",
        config.database_path()?.display()
    );
    Ok(())
}

fn status(config: &Config, as_json: bool) -> anyhow::Result<()> {
    let snapshot = JobQueue::new(open_database(config)?).status_snapshot()?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{snapshot}");
    }
    Ok(())
}

fn submit(
    config: &Config,
    file: &Path,
    provider: String,
    auto_summarize: bool,
    id: Option<String>,
) -> anyhow::Result<()> {
    let path: PathBuf = file
        .canonicalize()
        .with_context(|| format!("media file not found: {}", file.display()))?;
    if !path.is_file() {
        bail!("not a file: {}", path.display());
    }
    let locator = path.to_string_lossy().into_owned();

    let mut submission = NewSubmission::new(
        id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        locator.clone(),
    );
    submission.original_filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    submission.file_size = std::fs::metadata(&path)
        .ok()
        .and_then(|m| i64::try_from(m.len()).ok());

    let mut job = NewJob::transcribe(locator, provider);
    if auto_summarize {
        let flag = json!({ AUTO_SUMMARIZE_KEY: true });
        submission.metadata = Some(flag.clone());
        job = job.with_metadata(flag);
    }

    let tracker = SubmissionTracker::new(open_database(config)?);
    let job_id = tracker.create_with_job(&submission, job)?;
    println!("Submission {} queued as transcribe job {job_id}", submission.id);
    Ok(())
}

async fn run(config: Config, exit_when_empty: bool) -> anyhow::Result<()> {
    let db = open_database(&config)?;
    let registry = Arc::new(BackendRegistry::from_config(&config)?);
    let dispatcher = Dispatcher::new(JobQueue::new(db), registry, &config);

    let mut settings = WorkerSettings::from_config(&config);
    if exit_when_empty {
        settings = settings.exit_when_empty();
    }

    info!(
        workers = config.workers,
        poll_interval_secs = config.poll_interval_secs,
        "Starting mediaq worker v{}",
        env!("CARGO_PKG_VERSION")
    );
    let pool = WorkerPool::start(dispatcher, settings, config.workers)?;

    let shutdown = pool.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Interrupt received; draining workers");
        shutdown.trigger();
    })
    .context("failed to install Ctrl+C handler")?;

    let report = pool.wait().await;
    println!(
        "Processed {} job(s): {} completed, {} failed",
        report.processed(),
        report.completed,
        report.failed
    );
    Ok(())
}
