//! Headless Chrome strategy.
//!
//! Each fetch opens a fresh page with a rotated user agent, watches the main
//! document response for the HTTP 500 the site returns for unknown authors,
//! waits for redirects to land on the profile URL and hands back the rendered
//! HTML for selector extraction.

use super::{profile_url, wait_for_url, FetchOutcome, FetcherKind, PageContent, PageFetcher};
use crate::config::Settings;
use crate::error::{ElibError, Result};
use crate::identity::{DelayRange, IdentityPolicy, DEFAULT_POLL_DELAY};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, EventResponseReceived};
use chromiumoxide::Page;
use futures::{Stream, StreamExt};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Status the site answers with for a non-existent author
const NOT_FOUND_STATUS: i64 = 500;

/// Launch and pacing options for the browser strategies
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub base_url: String,
    pub headless: bool,
    pub request_delay: DelayRange,
    pub poll_delay: DelayRange,
    pub wait_bound: Duration,
}

impl From<&Settings> for BrowserOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            headless: settings.headless,
            request_delay: settings.request_delay,
            poll_delay: DEFAULT_POLL_DELAY,
            wait_bound: settings.wait_timeout,
        }
    }
}

/// Closes the wrapped page when dropped.
///
/// `close()` is the normal path; `Drop` spawns the close on the runtime so
/// early returns and `?` still release the page.
pub(crate) struct PageGuard {
    page: Page,
    url: String,
    closed: bool,
    runtime_handle: tokio::runtime::Handle,
}

impl PageGuard {
    fn new(page: Page, url: String) -> Self {
        Self {
            page,
            url,
            closed: false,
            runtime_handle: tokio::runtime::Handle::current(),
        }
    }

    pub(crate) async fn close(mut self) {
        self.closed = true;
        match self.page.clone().close().await {
            Ok(()) => debug!(url = %self.url, "Page closed"),
            Err(e) => warn!(url = %self.url, error = %e, "Failed to close page"),
        }
    }
}

impl Deref for PageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let page = self.page.clone();
        let url = std::mem::take(&mut self.url);
        self.runtime_handle.spawn(async move {
            if let Err(e) = page.close().await {
                warn!(url = %url, error = %e, "Page cleanup on drop failed");
            } else {
                trace!(url = %url, "Page cleanup on drop succeeded");
            }
        });
    }
}

fn browser_err(e: impl std::fmt::Display) -> ElibError {
    ElibError::Browser(e.to_string())
}

/// Verdict on one response seen by the page.
///
/// Only documents count: an image or script answering 500 says nothing about
/// the author.
pub(crate) fn check_document_status(author_id: u32, mime_type: &str, status: i64) -> Result<()> {
    let mime = mime_type.to_ascii_lowercase();
    let is_document = mime.starts_with("text/html") || mime.starts_with("application/xhtml+xml");
    if is_document && status == NOT_FOUND_STATUS {
        return Err(ElibError::NotFound(author_id));
    }
    Ok(())
}

/// Drain `(mime type, status)` pairs; `true` once one proves the author missing
async fn watch_responses<S>(author_id: u32, responses: S) -> bool
where
    S: Stream<Item = (String, i64)>,
{
    tokio::pin!(responses);
    while let Some((mime, status)) = responses.next().await {
        if check_document_status(author_id, &mime, status).is_err() {
            return true;
        }
        trace!(author_id, status, mime = %mime, "Response observed");
    }
    false
}

/// Fetches rendered profile pages through a launched Chrome instance
pub struct BrowserFetcher {
    browser: Browser,
    handler: JoinHandle<()>,
    options: BrowserOptions,
    identity: Arc<dyn IdentityPolicy>,
}

impl BrowserFetcher {
    /// Launch Chrome and start driving its CDP event loop
    pub async fn launch(options: BrowserOptions, identity: Arc<dyn IdentityPolicy>) -> Result<Self> {
        let mut builder = BrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(ElibError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler event error");
                }
            }
        });

        info!(headless = options.headless, "Browser launched");
        Ok(Self {
            browser,
            handler,
            options,
            identity,
        })
    }

    /// Open the profile of `author_id` and wait until it is really displayed.
    ///
    /// The returned guard closes the page when dropped.
    pub(crate) async fn open_profile(&self, author_id: u32) -> Result<PageGuard> {
        let url = profile_url(&self.options.base_url, author_id);
        self.identity.pause(self.options.request_delay).await;

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(browser_err)?;
        let guard = PageGuard::new(page, url.clone());

        guard
            .set_user_agent(SetUserAgentOverrideParams::new(self.identity.next_user_agent()))
            .await
            .map_err(browser_err)?;

        if let Err(e) = guard.execute(EnableParams::default()).await {
            warn!(author_id, error = %e, "Failed to enable network events");
        }

        let responses = guard
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(browser_err)?
            .map(|event| (event.response.mime_type.clone(), event.response.status));
        let (missing_tx, mut missing_rx) = oneshot::channel::<()>();
        // Watches redirects, interstitials and the profile itself
        let listener = tokio::spawn(async move {
            if watch_responses(author_id, responses).await {
                let _ = missing_tx.send(());
            }
        });

        let settled = {
            let settle = async {
                debug!(author_id, url = %url, "Navigating");
                guard.goto(url.as_str()).await.map_err(browser_err)?;
                let page: &Page = &guard;
                wait_for_url(
                    || async move { page.url().await.map_err(browser_err) },
                    &url,
                    self.options.wait_bound,
                    self.identity.as_ref(),
                    self.options.poll_delay,
                )
                .await
            };
            tokio::pin!(settle);

            tokio::select! {
                biased;
                seen = &mut missing_rx => match seen {
                    Ok(()) => Err(ElibError::NotFound(author_id)),
                    // Listener ended without a verdict
                    Err(_) => (&mut settle).await,
                },
                settled = &mut settle => match missing_rx.try_recv() {
                    Ok(()) => Err(ElibError::NotFound(author_id)),
                    Err(_) => settled,
                },
            }
        };
        listener.abort();

        if let Err(ElibError::NotFound(_)) = settled {
            info!(author_id, "Site reports no such author");
        }
        settled?;

        Ok(guard)
    }

    async fn render(&self, author_id: u32) -> Result<PageContent> {
        let guard = self.open_profile(author_id).await?;
        // Dwell on the page like a reader before taking the DOM snapshot
        self.identity.pause(self.options.request_delay).await;
        let html = guard.content().await.map_err(browser_err);
        guard.close().await;
        Ok(PageContent::Html(html?))
    }
}

impl Drop for BrowserFetcher {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, author_id: u32) -> FetchOutcome {
        self.render(author_id).await.into()
    }

    fn kind(&self) -> FetcherKind {
        FetcherKind::Browser
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn responses(items: &[(&str, i64)]) -> impl Stream<Item = (String, i64)> {
        let items: Vec<(String, i64)> = items.iter().map(|(m, s)| (m.to_string(), *s)).collect();
        stream::iter(items)
    }

    #[test]
    fn test_document_500_means_not_found() {
        assert!(matches!(
            check_document_status(7, "text/html; charset=windows-1251", 500),
            Err(ElibError::NotFound(7))
        ));
        assert!(matches!(
            check_document_status(7, "Application/XHTML+XML", 500),
            Err(ElibError::NotFound(7))
        ));
    }

    #[test]
    fn test_document_success_continues() {
        assert!(check_document_status(7, "text/html", 200).is_ok());
        assert!(check_document_status(7, "text/html", 302).is_ok());
    }

    #[test]
    fn test_non_document_500_is_ignored() {
        assert!(check_document_status(7, "image/png", 500).is_ok());
        assert!(check_document_status(7, "application/javascript", 500).is_ok());
    }

    #[tokio::test]
    async fn test_late_500_after_interstitial_is_caught() {
        let seen = responses(&[
            ("text/html", 200),
            ("image/gif", 500),
            ("text/html", 200),
            ("text/html", 500),
        ]);
        assert!(watch_responses(3, seen).await);
    }

    #[tokio::test]
    async fn test_healthy_page_never_reports_missing() {
        let seen = responses(&[("text/html", 302), ("text/html", 200), ("text/css", 500)]);
        assert!(!watch_responses(3, seen).await);
    }
}
