//! Profile page acquisition.
//!
//! A [`PageFetcher`] turns an author identifier into raw page content or a
//! typed [`FetchOutcome`] failure. Three interchangeable strategies exist:
//!
//! - [`HttpFetcher`] - plain GET, optionally through a forward-proxy prefix
//! - `BrowserFetcher` - headless Chrome navigation (feature `browser`)
//! - `OcrFetcher` - Chrome screenshot + tesseract (feature `ocr`)
//!
//! One strategy is chosen from [`Settings`] at startup via [`build_fetcher`].

#[cfg(feature = "browser")]
mod browser;
mod http;
#[cfg(feature = "ocr")]
mod ocr;

#[cfg(feature = "browser")]
pub use browser::{BrowserFetcher, BrowserOptions};
pub use http::{direct_profile_url, HttpFetcher};
#[cfg(feature = "ocr")]
pub use ocr::OcrFetcher;

use crate::config::Settings;
use crate::error::{ElibError, Result};
use crate::identity::{DelayRange, IdentityPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default site root
pub const DEFAULT_BASE_URL: &str = "https://www.elibrary.ru";

/// Upper bound for a redirect or CAPTCHA stall to resolve
pub const DEFAULT_WAIT_BOUND: Duration = Duration::from_secs(30);

/// Shortest gap between two URL polls, whatever the identity policy says
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Profile URL the browser strategies navigate to; the site redirects through it
pub fn profile_url(base_url: &str, author_id: u32) -> String {
    format!(
        "{}/author_profile.asp?id={}",
        base_url.trim_end_matches('/'),
        author_id
    )
}

/// Raw content produced by a fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageContent {
    /// Page markup (served or rendered)
    Html(String),
    /// Text recognized from a page screenshot
    RecognizedText(String),
}

impl PageContent {
    pub fn as_str(&self) -> &str {
        match self {
            PageContent::Html(s) | PageContent::RecognizedText(s) => s,
        }
    }
}

/// Result of one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(PageContent),
    /// The site has no such author; not worth retrying
    NotFound,
    /// Network error, timeout or unexpected page state; a later run may succeed
    TransientFailure(String),
}

impl From<Result<PageContent>> for FetchOutcome {
    fn from(result: Result<PageContent>) -> Self {
        match result {
            Ok(content) => FetchOutcome::Success(content),
            Err(ElibError::NotFound(_)) => FetchOutcome::NotFound,
            Err(e) => FetchOutcome::TransientFailure(e.to_string()),
        }
    }
}

/// Which fetch strategy a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    #[default]
    Http,
    Browser,
    Ocr,
}

impl FromStr for FetcherKind {
    type Err = ElibError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "direct" => Ok(FetcherKind::Http),
            "browser" | "locator" => Ok(FetcherKind::Browser),
            "ocr" => Ok(FetcherKind::Ocr),
            other => Err(ElibError::Config(format!("Unknown strategy '{}'", other))),
        }
    }
}

impl fmt::Display for FetcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetcherKind::Http => "http",
            FetcherKind::Browser => "browser",
            FetcherKind::Ocr => "ocr",
        })
    }
}

/// Produces raw content for an author identifier.
///
/// Implementations never let an error escape: every failure is reported as a
/// [`FetchOutcome`] variant.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, author_id: u32) -> FetchOutcome;

    /// Strategy this fetcher implements; decides which extractor reads its content
    fn kind(&self) -> FetcherKind;
}

/// Poll `current_url` until it starts with `expected`, for at most `bound`.
///
/// Redirects and CAPTCHA interstitials leave the page on a foreign URL for a
/// while. Exceeding the bound is a [`ElibError::Transient`], not a hang.
pub async fn wait_for_url<F, Fut>(
    mut current_url: F,
    expected: &str,
    bound: Duration,
    identity: &dyn IdentityPolicy,
    poll: DelayRange,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>>>,
{
    let polling = async {
        loop {
            let url = current_url().await?;
            if url.as_deref().is_some_and(|u| u.starts_with(expected)) {
                return Ok(());
            }
            debug!(current = ?url, expected, "Waiting for redirect to settle");
            let delay = identity
                .next_delay(poll.min, poll.max)
                .max(MIN_POLL_INTERVAL);
            tokio::time::sleep(delay).await;
        }
    };

    match tokio::time::timeout(bound, polling).await {
        Ok(result) => result,
        Err(_) => {
            warn!(expected, bound_secs = bound.as_secs(), "Timed out waiting for URL");
            Err(ElibError::Transient(format!(
                "timed out after {}s waiting for {}",
                bound.as_secs(),
                expected
            )))
        }
    }
}

/// Construct the fetcher selected by `settings.strategy`
pub async fn build_fetcher(
    settings: &Settings,
    identity: Arc<dyn IdentityPolicy>,
) -> Result<Box<dyn PageFetcher>> {
    match settings.strategy {
        FetcherKind::Http => Ok(Box::new(HttpFetcher::new(settings, identity)?)),
        #[cfg(feature = "browser")]
        FetcherKind::Browser => Ok(Box::new(
            BrowserFetcher::launch(BrowserOptions::from(settings), identity).await?,
        )),
        #[cfg(feature = "ocr")]
        FetcherKind::Ocr => Ok(Box::new(OcrFetcher::launch(settings, identity).await?)),
        #[allow(unreachable_patterns)]
        other => Err(ElibError::Config(format!(
            "Strategy '{}' is not compiled in; rebuild with the matching cargo feature",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FixedIdentity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_profile_url() {
        assert_eq!(
            profile_url("https://www.elibrary.ru/", 123),
            "https://www.elibrary.ru/author_profile.asp?id=123"
        );
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: Result<PageContent> = Ok(PageContent::Html("x".into()));
        assert_eq!(
            FetchOutcome::from(ok),
            FetchOutcome::Success(PageContent::Html("x".into()))
        );
        assert_eq!(
            FetchOutcome::from(Err(ElibError::NotFound(4))),
            FetchOutcome::NotFound
        );
        assert!(matches!(
            FetchOutcome::from(Err(ElibError::Browser("crashed".into()))),
            FetchOutcome::TransientFailure(reason) if reason.contains("crashed")
        ));
    }

    #[test]
    fn test_fetcher_kind_parse() {
        assert_eq!("HTTP".parse::<FetcherKind>().ok(), Some(FetcherKind::Http));
        assert_eq!("locator".parse::<FetcherKind>().ok(), Some(FetcherKind::Browser));
        assert_eq!(" ocr ".parse::<FetcherKind>().ok(), Some(FetcherKind::Ocr));
        assert!("carrier-pigeon".parse::<FetcherKind>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_url_settles() {
        let polls = AtomicUsize::new(0);
        let identity = FixedIdentity::default();
        let result = wait_for_url(
            || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(Some(if n < 3 {
                        "https://www.elibrary.ru/page_captcha.asp".to_string()
                    } else {
                        "https://www.elibrary.ru/author_profile.asp?id=9".to_string()
                    }))
                }
            },
            "https://www.elibrary.ru/author_profile.asp?id=9",
            DEFAULT_WAIT_BOUND,
            &identity,
            DelayRange::zero(),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_url_times_out() {
        let identity = FixedIdentity::default();
        let result = wait_for_url(
            || async { Ok(Some("https://www.elibrary.ru/page_captcha.asp".to_string())) },
            "https://www.elibrary.ru/author_profile.asp?id=9",
            Duration::from_secs(30),
            &identity,
            DelayRange::zero(),
        )
        .await;

        match result {
            Err(ElibError::Transient(reason)) => assert!(reason.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
