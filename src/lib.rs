//! # elibmetrics
//!
//! Cached eLibrary author metrics: name, publication count, uncited
//! publication count and h-index for a list of author identifiers.
//!
//! ## Modules
//!
//! - [`manager`] - cache-first orchestration and the batch driver
//! - [`fetch`] - HTTP, headless browser and OCR page fetchers
//! - [`extract`] - field extraction rules (regex, CSS selectors, text labels)
//! - [`author`] - record assembly and validation
//! - [`identity`] - user-agent rotation and request jitter
//! - [`store`] - SQLite record store
//! - [`report`] - id list input and table output
//! - [`config`] - `analyzer.config` settings
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use elibmetrics::{build_fetcher, AuthorsManager, RandomIdentity, Settings, SqliteStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::default();
//!     let fetcher = build_fetcher(&settings, Arc::new(RandomIdentity)).await?;
//!     let store = Arc::new(SqliteStore::open(&settings.database).await?);
//!     let manager = AuthorsManager::new(fetcher, store)?;
//!     if let Some(author) = manager.get_author(5).await {
//!         println!("{}", author);
//!     }
//!     Ok(())
//! }
//! ```

pub mod author;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod identity;
pub mod manager;
pub mod report;
pub mod store;

pub use author::{assemble, AuthorRecord};
pub use config::Settings;
pub use error::{ElibError, Result};
pub use extract::{ExtractionStrategy, Field, RawExtraction};
pub use fetch::{build_fetcher, FetchOutcome, FetcherKind, PageContent, PageFetcher};
pub use identity::{DelayRange, FixedIdentity, IdentityPolicy, RandomIdentity};
pub use manager::{AuthorsManager, BatchReport};
pub use report::ReportFormat;
pub use store::{AuthorStore, MemoryStore, SqliteStore};
