//! Screenshot + OCR strategy.
//!
//! Navigation is shared with [`BrowserFetcher`]; instead of the DOM, a
//! full-page screenshot is run through tesseract and the recognized text is
//! returned for label extraction.

use super::{BrowserFetcher, BrowserOptions, FetchOutcome, FetcherKind, PageContent, PageFetcher};
use crate::config::Settings;
use crate::error::{ElibError, Result};
use crate::identity::IdentityPolicy;
use async_trait::async_trait;
use chromiumoxide::page::ScreenshotParams;
use rusty_tesseract::{Args, Image};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info};

pub struct OcrFetcher {
    browser: BrowserFetcher,
    lang: String,
}

impl OcrFetcher {
    pub async fn launch(settings: &Settings, identity: Arc<dyn IdentityPolicy>) -> Result<Self> {
        let browser = BrowserFetcher::launch(BrowserOptions::from(settings), identity).await?;
        info!(lang = %settings.ocr_lang, "OCR fetcher ready");
        Ok(Self {
            browser,
            lang: settings.ocr_lang.clone(),
        })
    }

    async fn recognize_profile(&self, author_id: u32) -> Result<PageContent> {
        let guard = self.browser.open_profile(author_id).await?;
        let shot = guard
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| ElibError::Browser(e.to_string()));
        guard.close().await;
        let png = shot?;
        debug!(author_id, bytes = png.len(), "Screenshot captured");

        let lang = self.lang.clone();
        let text = tokio::task::spawn_blocking(move || recognize_png(&png, &lang))
            .await
            .map_err(|e| ElibError::Ocr(format!("OCR task failed: {}", e)))??;

        debug!(author_id, chars = text.len(), "Text recognized");
        Ok(PageContent::RecognizedText(text))
    }
}

/// Run tesseract over PNG bytes; the image goes through a temporary file
fn recognize_png(png: &[u8], lang: &str) -> Result<String> {
    let mut file = tempfile::Builder::new()
        .prefix("elib-profile-")
        .suffix(".png")
        .tempfile()?;
    file.write_all(png)?;
    file.flush()?;

    let image = Image::from_path(file.path()).map_err(|e| ElibError::Ocr(e.to_string()))?;
    let args = Args {
        lang: lang.to_string(),
        ..Args::default()
    };
    rusty_tesseract::image_to_string(&image, &args).map_err(|e| ElibError::Ocr(e.to_string()))
}

#[async_trait]
impl PageFetcher for OcrFetcher {
    async fn fetch(&self, author_id: u32) -> FetchOutcome {
        self.recognize_profile(author_id).await.into()
    }

    fn kind(&self) -> FetcherKind {
        FetcherKind::Ocr
    }
}
