//! elibmetrics - cached eLibrary author metrics collector
//!
//! Resolves author identifiers to name, publication count, uncited
//! publication count and h-index, storing every result so each author is
//! fetched from the site at most once.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! elibmetrics fetch -i authors.txt -o report.md --strategy browser
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! elibmetrics serve --port 3000
//! ```

use anyhow::{bail, Context, Result};
use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, Subcommand};
use elibmetrics::{
    build_fetcher,
    config::DEFAULT_CONFIG_FILE,
    report::{self, ReportFormat},
    AuthorRecord, AuthorStore, AuthorsManager, FetcherKind, IdentityPolicy, RandomIdentity,
    Settings, SqliteStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Cached eLibrary author metrics collector
#[derive(Parser)]
#[command(name = "elibmetrics")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings file (key=value)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Author database, overrides the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a list of author ids and write a report
    Fetch {
        /// Comma-separated author ids
        #[arg(short, long)]
        input: PathBuf,

        /// Report file
        #[arg(short, long)]
        output: PathBuf,

        /// Report format (default: from the output extension)
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,

        /// Fetch strategy: http, browser or ocr
        #[arg(long)]
        strategy: Option<FetcherKind>,

        /// Proxy prefix prepended to profile URLs
        #[arg(long)]
        proxy: Option<String>,

        /// Concurrent authors (1 = sequential)
        #[arg(long)]
        workers: Option<usize>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,
    },

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Fetch strategy: http, browser or ocr
        #[arg(long)]
        strategy: Option<FetcherKind>,
    },

    /// Inspect or edit stored authors
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Print one stored author
    Show { id: u32 },
    /// Forget an author so the next run fetches it again
    Delete { id: u32 },
    /// Print every stored author as a table
    List,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let mut settings = Settings::from_file(&cli.config)
        .with_context(|| format!("Failed to read config {:?}", cli.config))?;
    if let Some(db) = cli.db {
        settings.database = db;
    }
    // Still single-threaded: safe to touch the environment
    export_tessdata(&settings);

    tokio::runtime::Runtime::new()?.block_on(run(cli.command, settings))
}

async fn run(command: Commands, mut settings: Settings) -> Result<()> {
    match command {
        Commands::Fetch {
            input,
            output,
            format,
            strategy,
            proxy,
            workers,
            headed,
        } => {
            if let Some(strategy) = strategy {
                settings.strategy = strategy;
            }
            if proxy.is_some() {
                settings.web_proxy = proxy;
            }
            if let Some(workers) = workers {
                settings.workers = workers.max(1);
            }
            if headed {
                settings.headless = false;
            }
            run_fetch(settings, input, output, format).await
        }
        Commands::Serve {
            port,
            host,
            strategy,
        } => {
            if let Some(strategy) = strategy {
                settings.strategy = strategy;
            }
            run_server(settings, host, port).await
        }
        Commands::Store { action } => handle_store(&settings, action).await,
    }
}

/// tesseract finds its language data through `TESSDATA_PREFIX`
fn export_tessdata(settings: &Settings) {
    if let Some(tessdata) = &settings.tessdata {
        std::env::set_var("TESSDATA_PREFIX", tessdata);
        info!(path = ?tessdata, "Tesseract data directory set");
    }
}

async fn build_manager(settings: &Settings) -> Result<AuthorsManager> {
    let store = SqliteStore::open(&settings.database)
        .await
        .with_context(|| format!("Failed to open database {:?}", settings.database))?;
    let identity: Arc<dyn IdentityPolicy> = Arc::new(RandomIdentity);
    let fetcher = build_fetcher(settings, identity)
        .await
        .context("Failed to start fetcher")?;

    Ok(AuthorsManager::new(fetcher, Arc::new(store))?.workers(settings.workers))
}

// ============================================================================
// Fetch Pipeline
// ============================================================================

async fn run_fetch(
    settings: Settings,
    input: PathBuf,
    output: PathBuf,
    format: Option<ReportFormat>,
) -> Result<()> {
    validate_fetch_paths(&input, &output)?;

    let ids = report::read_author_ids(&input)?;
    if ids.is_empty() {
        warn!(path = ?input, "No author ids in input");
    }

    println!("==================================================");
    println!("Resolving {} authors ({} strategy)", ids.len(), settings.strategy);
    println!("==================================================");

    let manager = build_manager(&settings).await?;
    let batch = manager.get_authors(&ids).await;

    let format = format.unwrap_or_else(|| ReportFormat::from_path(&output));
    report::save_report(&output, &batch.authors, format)
        .with_context(|| format!("Failed to write report {:?}", output))?;

    println!(
        "Done: {} resolved, {} failed. Report: {:?}",
        batch.authors.len(),
        batch.failed(),
        output
    );
    if batch.failed() > 0 {
        println!("Failed ids are not stored; run again to retry them.");
    }
    Ok(())
}

/// Reject bad paths before any network work starts
fn validate_fetch_paths(input: &Path, output: &Path) -> Result<()> {
    if !input.is_file() {
        bail!("Input file {:?} does not exist or is a directory", input);
    }
    if output.exists() && !output.is_file() {
        bail!("Output path {:?} is not a file", output);
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            bail!("Output directory {:?} does not exist", parent);
        }
    }
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(settings: Settings, host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, strategy = %settings.strategy, "Starting HTTP server");

    let manager = build_manager(&settings).await?;
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/authors", post(authors_handler))
        .route("/authors/{id}", get(author_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(manager));

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Single author lookup
async fn author_handler(
    State(manager): State<Arc<AuthorsManager>>,
    UrlPath(id): UrlPath<u32>,
) -> Result<Json<AuthorRecord>, (StatusCode, String)> {
    manager.get_author(id).await.map(Json).ok_or((
        StatusCode::NOT_FOUND,
        format!("author {} could not be resolved", id),
    ))
}

/// Batch request body
#[derive(Debug, Deserialize)]
struct AuthorsRequest {
    ids: Vec<u32>,
}

/// Batch response
#[derive(Debug, Serialize)]
struct AuthorsResponse {
    requested: usize,
    failed: usize,
    authors: Vec<AuthorRecord>,
}

async fn authors_handler(
    State(manager): State<Arc<AuthorsManager>>,
    Json(req): Json<AuthorsRequest>,
) -> Json<AuthorsResponse> {
    let ids: BTreeSet<u32> = req.ids.into_iter().collect();
    info!(count = ids.len(), "Batch request");

    let batch = manager.get_authors(&ids).await;
    Json(AuthorsResponse {
        requested: batch.requested,
        failed: batch.failed(),
        authors: batch.authors.into_iter().collect(),
    })
}

// ============================================================================
// Store Administration
// ============================================================================

async fn handle_store(settings: &Settings, action: StoreAction) -> Result<()> {
    let store = open_existing(&settings.database).await?;

    match action {
        StoreAction::Show { id } => match store.get(id).await? {
            Some(author) => println!("{}", author),
            None => println!("Author {} is not stored.", id),
        },
        StoreAction::Delete { id } => {
            if store.delete(id).await? {
                println!("Author {} deleted.", id);
            } else {
                println!("Author {} is not stored.", id);
            }
        }
        StoreAction::List => {
            let authors: BTreeSet<AuthorRecord> = store.list().await?.into_iter().collect();
            print!("{}", report::render_markdown(&authors));
        }
    }

    store.close().await;
    Ok(())
}

async fn open_existing(path: &Path) -> Result<SqliteStore> {
    if !path.exists() {
        bail!("Database {:?} does not exist", path);
    }
    SqliteStore::open(path)
        .await
        .with_context(|| format!("Failed to open database {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("tempdir");
        let input = dir.path().join("ids.txt");
        std::fs::write(&input, "1,2").expect("write ids");
        (dir, input)
    }

    #[test]
    fn test_fetch_paths_accept_new_report_file() {
        let (dir, input) = workspace();
        assert!(validate_fetch_paths(&input, &dir.path().join("report.md")).is_ok());
    }

    #[test]
    fn test_output_directory_is_rejected() {
        let (dir, input) = workspace();
        let err = validate_fetch_paths(&input, dir.path()).expect_err("directory output");
        assert!(err.to_string().contains("is not a file"));
    }

    #[test]
    fn test_bad_input_or_missing_parent_is_rejected() {
        let (dir, input) = workspace();
        let report = dir.path().join("report.md");
        assert!(validate_fetch_paths(&dir.path().join("absent.txt"), &report).is_err());
        assert!(validate_fetch_paths(dir.path(), &report).is_err());
        assert!(validate_fetch_paths(&input, &dir.path().join("nested/report.md")).is_err());
    }

    #[test]
    fn test_tessdata_exported_to_environment() {
        let settings = Settings {
            tessdata: Some(PathBuf::from("/opt/tessdata")),
            ..Settings::default()
        };
        export_tessdata(&settings);
        assert_eq!(
            std::env::var_os("TESSDATA_PREFIX"),
            Some(std::ffi::OsString::from("/opt/tessdata"))
        );
    }
}
