//! Cache-first author acquisition.
//!
//! [`AuthorsManager::get_author`] serves stored records without touching the
//! network and otherwise runs fetch -> extract -> assemble -> store. It is the
//! single place where per-author failures are swallowed, so a batch keeps
//! going no matter what happens to one identifier.

use crate::author::{assemble, AuthorRecord};
use crate::error::{ElibError, Result};
use crate::extract::ExtractionStrategy;
use crate::fetch::{FetchOutcome, PageFetcher};
use crate::store::AuthorStore;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Outcome of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub authors: BTreeSet<AuthorRecord>,
    /// Identifiers asked for
    pub requested: usize,
}

impl BatchReport {
    /// Identifiers that could not be resolved this run
    pub fn failed(&self) -> usize {
        self.requested.saturating_sub(self.authors.len())
    }
}

/// Coordinates the record store and the fetch pipeline
pub struct AuthorsManager {
    fetcher: Box<dyn PageFetcher>,
    extractor: ExtractionStrategy,
    store: Arc<dyn AuthorStore>,
    /// In-flight identifiers; one acquisition per id at a time
    claims: Mutex<HashMap<u32, Arc<tokio::sync::Mutex<()>>>>,
    workers: usize,
}

impl AuthorsManager {
    /// Manager using the default extraction rules for the fetcher's strategy
    pub fn new(fetcher: Box<dyn PageFetcher>, store: Arc<dyn AuthorStore>) -> Result<Self> {
        let extractor = ExtractionStrategy::for_fetcher(fetcher.kind())?;
        Ok(Self::with_extractor(fetcher, extractor, store))
    }

    pub fn with_extractor(
        fetcher: Box<dyn PageFetcher>,
        extractor: ExtractionStrategy,
        store: Arc<dyn AuthorStore>,
    ) -> Self {
        info!(strategy = %fetcher.kind(), "AuthorsManager created");
        Self {
            fetcher,
            extractor,
            store,
            claims: Mutex::new(HashMap::new()),
            workers: 1,
        }
    }

    /// Resolve up to `workers` identifiers concurrently in a batch
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Record for `author_id`, or `None` if it cannot be obtained this run.
    ///
    /// Never fails: fetch, parse, store and even panicking faults are logged
    /// and folded into `None`.
    pub async fn get_author(&self, author_id: u32) -> Option<AuthorRecord> {
        match AssertUnwindSafe(self.resolve(author_id)).catch_unwind().await {
            Ok(Ok(record)) => Some(record),
            Ok(Err(ElibError::NotFound(_))) => {
                warn!(author_id, "Author does not exist, skipping");
                None
            }
            Ok(Err(e @ ElibError::Parse(_))) => {
                error!(author_id, error = %e, "Profile page did not parse, extraction rules may be stale");
                None
            }
            Ok(Err(e)) => {
                warn!(author_id, error = %e, transient = e.is_transient(), "Skipping author this run");
                None
            }
            Err(_) => {
                error!(author_id, "Unexpected fault while resolving author");
                None
            }
        }
    }

    /// Resolve every identifier, keeping only the successes
    pub async fn get_authors(&self, author_ids: &BTreeSet<u32>) -> BatchReport {
        info!(count = author_ids.len(), workers = self.workers, "Resolving authors");

        let authors: BTreeSet<AuthorRecord> = stream::iter(author_ids.iter().copied())
            .map(|id| self.get_author(id))
            .buffer_unordered(self.workers)
            .filter_map(|record| async move { record })
            .collect()
            .await;

        let report = BatchReport {
            authors,
            requested: author_ids.len(),
        };
        info!(
            resolved = report.authors.len(),
            failed = report.failed(),
            "Batch complete"
        );
        report
    }

    async fn resolve(&self, author_id: u32) -> Result<AuthorRecord> {
        if let Some(record) = self.cached(author_id).await? {
            return Ok(record);
        }

        let claim = self.claim(author_id)?;
        let result = {
            let _held = claim.lock().await;
            // Another worker may have stored it while we waited
            match self.cached(author_id).await? {
                Some(record) => Ok(record),
                None => self.acquire(author_id).await,
            }
        };
        self.release(author_id, claim);
        result
    }

    async fn cached(&self, author_id: u32) -> Result<Option<AuthorRecord>> {
        if !self.store.exists(author_id).await? {
            return Ok(None);
        }
        let record = self.store.get(author_id).await?;
        if record.is_some() {
            debug!(author_id, "Served from store");
        }
        Ok(record)
    }

    async fn acquire(&self, author_id: u32) -> Result<AuthorRecord> {
        debug!(author_id, "Fetching author profile");
        let content = match self.fetcher.fetch(author_id).await {
            FetchOutcome::Success(content) => content,
            FetchOutcome::NotFound => return Err(ElibError::NotFound(author_id)),
            FetchOutcome::TransientFailure(reason) => return Err(ElibError::Transient(reason)),
        };

        let extraction = self.extractor.extract(&content);
        let record = assemble(author_id, &extraction)?;

        if self.store.put(&record).await? {
            info!(author_id, record = %record, "Author resolved");
            Ok(record)
        } else {
            // First writer wins; hand back what is stored
            Ok(self.store.get(author_id).await?.unwrap_or(record))
        }
    }

    fn claim(&self, author_id: u32) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|_| ElibError::Config("claim table lock poisoned".to_string()))?;
        Ok(claims.entry(author_id).or_default().clone())
    }

    fn release(&self, author_id: u32, claim: Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut claims) = self.claims.lock() {
            // Table entry + ours: nobody else is waiting
            if Arc::strong_count(&claim) <= 2 {
                claims.remove(&author_id);
            }
        }
    }
}
