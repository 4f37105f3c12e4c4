//! Tracewise CLI: ingest attribution evidence and print summaries as JSON.
//!
//! Usage:
//!   tracewise scan --repo <path> --repo-id <n> <sha>... [--db path] [--config path]
//!   tracewise import <file> --repo <path> --repo-id <n>
//!   tracewise ranges <sha> <path> --repo-id <n>
//!   tracewise coverage <sha> --repo <path> --repo-id <n>
//!   tracewise status --repo-id <n>

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracewise::config::DB_ENV;
use tracewise::{CancellationToken, TraceApi, TraceConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tracewise",
    version,
    about = "Line-level human/AI attribution for git history"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true, env = DB_ENV)]
    db: Option<PathBuf>,
    /// Path to a YAML config file (default: <repo>/.narrative/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Repository root
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,
    /// Repository id used to scope stored records
    #[arg(long, global = true, default_value_t = 1)]
    repo_id: i64,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest all evidence and summarize the given commits
    Scan {
        /// Commit SHAs to summarize
        #[arg(required = true)]
        shas: Vec<String>,
        /// Also derive records from diffs for commits with no evidence
        #[arg(long)]
        diff_fallback: bool,
    },
    /// Import a trace file into the repository's evidence directory
    Import {
        /// Trace file to import
        file: PathBuf,
    },
    /// Print attributed ranges for one file of a commit
    Ranges {
        sha: String,
        path: String,
    },
    /// Print how much of a commit's added lines are attributed
    Coverage {
        sha: String,
    },
    /// Print the telemetry collector status after a scan
    Status {
        /// Commit SHAs to refresh before reporting
        shas: Vec<String>,
    },
}

fn load_config(cli: &Cli) -> Result<TraceConfig, String> {
    let mut config = match &cli.config {
        Some(path) => TraceConfig::load(path),
        None => TraceConfig::discover(&cli.repo),
    }
    .map_err(|e| e.to_string())?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn fail(error: impl std::fmt::Display) -> i32 {
    eprintln!("Error: {}", error);
    1
}

async fn cmd_scan(api: &TraceApi, repo: &Path, repo_id: i64, shas: &[String]) -> i32 {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });
    match api.scan(repo, repo_id, shas, &cancel).await {
        Ok(report) => print_json(&report),
        Err(e) => fail(e),
    }
}

async fn cmd_import(api: &TraceApi, repo: &Path, repo_id: i64, file: &Path) -> i32 {
    let source = match file.canonicalize() {
        Ok(p) => p,
        Err(e) => return fail(format!("cannot resolve '{}': {}", file.display(), e)),
    };
    match api.import_trace_file(repo, repo_id, &source).await {
        Ok(outcome) => print_json(&outcome),
        Err(e) => fail(e),
    }
}

async fn cmd_coverage(api: &TraceApi, repo: &Path, repo_id: i64, sha: &str) -> i32 {
    match api.coverage(repo, repo_id, sha).await {
        Ok(coverage) => print_json(&coverage),
        Err(e) => fail(e),
    }
}

async fn cmd_status(api: &TraceApi, repo: &Path, repo_id: i64, shas: &[String]) -> i32 {
    if let Err(e) = api.scan(repo, repo_id, shas, &CancellationToken::new()).await {
        return fail(e);
    }
    print_json(&api.collector_status(repo_id))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => std::process::exit(fail(e)),
    };
    if let Commands::Scan { diff_fallback: true, .. } = &cli.command {
        config.diff_fallback = true;
    }

    let api = match TraceApi::open(config) {
        Ok(api) => api,
        Err(e) => std::process::exit(fail(format!("Failed to open database: {}", e))),
    };

    let code = match &cli.command {
        Commands::Scan { shas, .. } => cmd_scan(&api, &cli.repo, cli.repo_id, shas).await,
        Commands::Import { file } => cmd_import(&api, &cli.repo, cli.repo_id, file).await,
        Commands::Ranges { sha, path } => match api.ranges_for_commit_file(cli.repo_id, sha, path) {
            Ok(ranges) => print_json(&ranges),
            Err(e) => fail(e),
        },
        Commands::Coverage { sha } => cmd_coverage(&api, &cli.repo, cli.repo_id, sha).await,
        Commands::Status { shas } => cmd_status(&api, &cli.repo, cli.repo_id, shas).await,
    };
    std::process::exit(code);
}
