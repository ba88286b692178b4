//! End-to-end runs of the acquisition pipeline against a stub site.

use async_trait::async_trait;
use elibmetrics::{
    report, AuthorRecord, AuthorStore, AuthorsManager, FetchOutcome, FetcherKind, PageContent,
    PageFetcher, SqliteStore,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn profile_page(name: &str, total: u32, cited: u32, h: u32) -> String {
    let cell = r##"</font></td><td align="center" class="midtext"><font color="#000000">"##;
    format!(
        r##"<html><head><title>{name} - Анализ публикационной активности</title></head><body><table>
<tr><td><font>Число публикаций на elibrary.ru{cell}<a href="author_items.asp">{total}</a></font></td></tr>
<tr><td><font>Индекс Хирша по всем публикациям на elibrary.ru{cell}{h}</font></td></tr>
<tr><td><font>Число публикаций автора, процитированных хотя бы один раз{cell}{cited} (50%)</font></td></tr>
</table></body></html>"##
    )
}

/// Serves a fixed set of profiles and counts calls per id
#[derive(Default)]
struct StubSite {
    pages: HashMap<u32, String>,
    calls: Mutex<HashMap<u32, usize>>,
    total: AtomicUsize,
}

impl StubSite {
    fn with_authors(ids: &[u32]) -> Self {
        let pages = ids
            .iter()
            .map(|&id| (id, profile_page(&format!("Автор {id}"), 20, 5, 3)))
            .collect();
        Self {
            pages,
            ..Self::default()
        }
    }

    fn calls_for(&self, id: u32) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .get(&id)
            .copied()
            .unwrap_or(0)
    }
}

struct SharedSite(Arc<StubSite>);

#[async_trait]
impl PageFetcher for SharedSite {
    async fn fetch(&self, author_id: u32) -> FetchOutcome {
        self.0.total.fetch_add(1, Ordering::SeqCst);
        *self.0.calls.lock().expect("lock").entry(author_id).or_default() += 1;
        match self.0.pages.get(&author_id) {
            Some(html) => FetchOutcome::Success(PageContent::Html(html.clone())),
            None => FetchOutcome::NotFound,
        }
    }

    fn kind(&self) -> FetcherKind {
        FetcherKind::Http
    }
}

async fn manager(site: &Arc<StubSite>, store: Arc<dyn AuthorStore>) -> AuthorsManager {
    AuthorsManager::new(Box::new(SharedSite(site.clone())), store).expect("manager")
}

#[tokio::test]
async fn test_repeated_batches_fetch_each_author_once() {
    let site = Arc::new(StubSite::with_authors(&[1, 2, 3]));
    let store = Arc::new(SqliteStore::open_in_memory().await.expect("store"));
    let manager = manager(&site, store).await;
    let ids: BTreeSet<u32> = [1, 2, 3].into_iter().collect();

    let first = manager.get_authors(&ids).await;
    let second = manager.get_authors(&ids).await;

    assert_eq!(first, second);
    assert_eq!(first.authors.len(), 3);
    assert_eq!(site.total.load(Ordering::SeqCst), 3);
    for id in ids {
        assert_eq!(site.calls_for(id), 1);
    }
}

#[tokio::test]
async fn test_unknown_author_is_dropped_from_batch() {
    let site = Arc::new(StubSite::with_authors(&[1, 2, 4]));
    let store = Arc::new(SqliteStore::open_in_memory().await.expect("store"));
    let manager = manager(&site, store.clone()).await;
    let ids: BTreeSet<u32> = [1, 2, 3, 4].into_iter().collect();

    let batch = manager.get_authors(&ids).await;

    let resolved: Vec<u32> = batch.authors.iter().map(|a| a.author_id).collect();
    assert_eq!(resolved, vec![1, 2, 4]);
    assert_eq!(batch.failed(), 1);
    assert!(!store.exists(3).await.expect("exists"));

    // Failures are not cached; the next run asks again
    manager.get_authors(&ids).await;
    assert_eq!(site.calls_for(3), 2);
    assert_eq!(site.calls_for(1), 1);
}

#[tokio::test]
async fn test_id_list_with_stored_author() {
    let site = Arc::new(StubSite::with_authors(&[1, 2, 3]));
    let store = Arc::new(SqliteStore::open_in_memory().await.expect("store"));
    let stored = AuthorRecord {
        author_id: 5,
        name: "Иванов Иван Иванович".to_string(),
        publishes_count: 42,
        zero_citt_publishes_count: 12,
        hirsh_index: 7,
    };
    assert!(store.put(&stored).await.expect("put"));
    let manager = manager(&site, store).await;

    let ids = report::parse_author_ids("1, 2, abc, 3, 5");
    let batch = manager.get_authors(&ids).await;

    assert_eq!(batch.requested, 4);
    assert_eq!(batch.authors.len(), 4);
    assert!(batch.authors.contains(&stored));
    assert_eq!(site.calls_for(5), 0);

    let table = report::render_markdown(&batch.authors);
    let rows: Vec<&str> = table.lines().skip(2).collect();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0], "|1|Автор 1|20|15|3|");
    assert_eq!(rows[3], "|5|Иванов Иван Иванович|42|12|7|");
}

#[tokio::test]
async fn test_records_survive_restart() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let path = dir.path().join("authors.db");
    let site = Arc::new(StubSite::with_authors(&[8]));

    {
        let store = Arc::new(SqliteStore::open(&path).await.expect("store"));
        let manager = manager(&site, store).await;
        assert!(manager.get_author(8).await.is_some());
    }

    let store = Arc::new(SqliteStore::open(&path).await.expect("reopen"));
    let manager = manager(&site, store).await;
    let author = manager.get_author(8).await.expect("stored");

    assert_eq!(author.publishes_count, 20);
    assert_eq!(author.zero_citt_publishes_count, 15);
    assert_eq!(site.calls_for(8), 1);
}
