use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "mediaq", version)]
#[command(about = "Durable job queue for transcription and summarization", long_about = None)]
pub struct Cli {
    /// Path to a JSON config file. Defaults to ~/.mediaq/config.json when present.
    #[arg(short, long, value_name = "FILE", env = "MEDIAQ_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path, overriding the config file.
    #[arg(long, value_name = "FILE", env = "MEDIAQ_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database and apply schema migrations.
    Init,

    /// Print job counts per status.
    Status {
        /// Print as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Run workers until interrupted.
    Run {
        /// Seconds to sleep when the queue is empty.
        #[arg(long, env = "MEDIAQ_POLL_INTERVAL", value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval: Option<u64>,

        /// Number of concurrent workers.
        #[arg(long, env = "MEDIAQ_WORKERS", value_parser = clap::value_parser!(u64).range(1..))]
        workers: Option<u64>,

        /// Stop once no pending job is left.
        #[arg(long)]
        exit_when_empty: bool,
    },

    /// Register a media file and queue its transcription.
    Submit {
        /// Media file to transcribe.
        file: PathBuf,

        /// Transcription provider.
        #[arg(long, default_value = "local")]
        provider: String,

        /// Queue a summary once the transcript is ready.
        #[arg(long)]
        auto_summarize: bool,

        /// Submission identifier. A random UUID when omitted.
        #[arg(long)]
        id: Option<String>,
    },

    /// Queue a summarization of literal text.
    Summarize {
        text: String,

        #[arg(long, default_value = "local")]
        provider: String,
    },

    /// Show one job as JSON.
    Job { id: i64 },

    /// Show one submission and its jobs as JSON.
    Submission { id: String },

    /// Fail jobs stuck in processing longer than the given age.
    Sweep {
        /// Age threshold in seconds.
        #[arg(long, value_name = "SECS")]
        older_than: u64,
    },
}
