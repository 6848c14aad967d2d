//! HTTP session backend: fetch pages with reqwest, find content with CSS
//! selectors, and materialize the image by downloading and re-encoding it.
//!
//! Pages are parsed from the markup the server returns, so content injected
//! by scripts is not visible to this backend. The locate step has nothing to
//! wait for and returns immediately.

use std::io::Cursor;
use std::path::Path;

use async_trait::async_trait;
use image::ImageFormat;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{ContentElement, PageHandle, Session, SessionConfig, SessionError};

/// Connect timeout for page and image requests.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Session backed by a pooled HTTP client.
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
}

impl HttpSession {
    /// Builds the HTTP client from `config`.
    ///
    /// `headless` and the viewport have no meaning for this backend and are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Acquire`] if the client cannot be built.
    #[instrument(level = "debug", skip(config), fields(timeout = ?config.page_load_timeout))]
    pub fn connect(config: &SessionConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(config.page_load_timeout)
            .gzip(true)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(SessionError::acquire)?;
        debug!("HTTP session ready");
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, SessionError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                SessionError::timeout(url)
            } else {
                SessionError::navigation(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl Session for HttpSession {
    fn name(&self) -> &str {
        "http"
    }

    async fn navigate(&mut self, url: &str) -> Result<PageHandle, SessionError> {
        let response = self.get(url).await?;
        let final_url = response.url().to_string();
        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                SessionError::timeout(url)
            } else {
                SessionError::navigation(url, e)
            }
        })?;

        Ok(PageHandle {
            url: url.to_string(),
            final_url,
            html: Some(html),
        })
    }

    async fn locate(
        &mut self,
        page: &PageHandle,
        selectors: &[String],
    ) -> Result<Option<ContentElement>, SessionError> {
        let Some(html) = page.html.as_deref() else {
            return Err(SessionError::locate(&page.url, "page has no markup"));
        };
        let base = Url::parse(&page.final_url).map_err(|e| SessionError::locate(&page.url, e))?;
        Ok(find_content(html, &base, selectors))
    }

    async fn capture(
        &mut self,
        element: &ContentElement,
        path: &Path,
    ) -> Result<u64, SessionError> {
        let Some(src) = element.src.as_deref() else {
            return Err(SessionError::capture(path, "element has no image source"));
        };

        let bytes = self
            .get(src)
            .await?
            .bytes()
            .await
            .map_err(|e| SessionError::navigation(src, e))?;

        let format = ImageFormat::from_path(path).map_err(|e| SessionError::capture(path, e))?;
        let decoded =
            image::load_from_memory(&bytes).map_err(|e| SessionError::capture(path, e))?;

        let mut encoded = Cursor::new(Vec::new());
        decoded
            .write_to(&mut encoded, format)
            .map_err(|e| SessionError::capture(path, e))?;
        let encoded = encoded.into_inner();

        tokio::fs::write(path, &encoded)
            .await
            .map_err(|e| SessionError::io(path, e))?;

        debug!(
            src,
            path = %path.display(),
            width = decoded.width(),
            height = decoded.height(),
            bytes = encoded.len(),
            "image captured"
        );
        Ok(encoded.len() as u64)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        // Connection pool is released on drop.
        Ok(())
    }
}

/// Finds the first element matching `selectors`, in order.
///
/// Non-image matches are narrowed to their first descendant `img`, if any.
fn find_content(html: &str, base: &Url, selectors: &[String]) -> Option<ContentElement> {
    let document = Html::parse_document(html);
    let img = Selector::parse("img").ok()?;

    for raw in selectors {
        let selector = match Selector::parse(raw) {
            Ok(selector) => selector,
            Err(error) => {
                warn!(selector = %raw, error = %error, "skipping invalid selector");
                continue;
            }
        };
        let Some(found) = document.select(&selector).next() else {
            continue;
        };
        let target = if found.value().name() == "img" {
            found
        } else {
            found.select(&img).next().unwrap_or(found)
        };
        return Some(describe(raw, target, base));
    }
    None
}

fn describe(selector: &str, element: ElementRef<'_>, base: &Url) -> ContentElement {
    let attrs = element.value();
    let src = attrs
        .attr("src")
        .or_else(|| attrs.attr("data-src"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| base.join(s).ok())
        .map(String::from);

    ContentElement {
        selector: selector.to_string(),
        src,
        alt: attrs.attr("alt").map(String::from),
        natural_width: attrs.attr("width").and_then(parse_pixels),
        natural_height: attrs.attr("height").and_then(parse_pixels),
    }
}

fn parse_pixels(value: &str) -> Option<u32> {
    value.trim().trim_end_matches("px").trim().parse().ok()
}
