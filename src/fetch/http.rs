//! Direct HTTP strategy.

use super::{FetchOutcome, FetcherKind, PageContent, PageFetcher};
use crate::config::Settings;
use crate::error::{ElibError, Result};
use crate::identity::{DelayRange, IdentityPolicy};
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Profile URL served without the browser redirect chain
pub fn direct_profile_url(base_url: &str, author_id: u32) -> String {
    format!(
        "{}/author_profile.asp?authorid={}",
        base_url.trim_end_matches('/'),
        author_id
    )
}

/// Fetches profile pages with plain GET requests
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    web_proxy: Option<String>,
    request_delay: DelayRange,
    identity: Arc<dyn IdentityPolicy>,
}

impl HttpFetcher {
    pub fn new(settings: &Settings, identity: Arc<dyn IdentityPolicy>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .build()
            .map_err(|e| ElibError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            base_url = %settings.base_url,
            web_proxy = settings.web_proxy.as_deref().unwrap_or(""),
            "HTTP fetcher ready"
        );

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            web_proxy: settings.web_proxy.clone(),
            request_delay: settings.request_delay,
            identity,
        })
    }

    /// Target URL for an author, with the proxy prefix glued on when configured
    pub fn target_url(&self, author_id: u32) -> String {
        let url = direct_profile_url(&self.base_url, author_id);
        match self.web_proxy.as_deref() {
            Some(prefix) => format!("{}{}", prefix, url),
            None => url,
        }
    }

    async fn download(&self, author_id: u32) -> Result<PageContent> {
        let url = self.target_url(author_id);
        self.identity.pause(self.request_delay).await;

        debug!(author_id, url = %url, "Fetching profile page");
        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, self.identity.next_user_agent())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "ru-RU,ru;q=0.9,en;q=0.8")
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(author_id, status = status.as_u16(), url = %url, "Unexpected response status");
            return Err(ElibError::Transient(format!("HTTP status {} for {}", status, url)));
        }

        let body = response.text().await?;
        debug!(author_id, bytes = body.len(), "Profile page downloaded");
        Ok(PageContent::Html(body))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, author_id: u32) -> FetchOutcome {
        self.download(author_id).await.into()
    }

    fn kind(&self) -> FetcherKind {
        FetcherKind::Http
    }
}
