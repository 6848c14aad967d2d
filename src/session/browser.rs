//! Headless Chromium session backend (feature `browser`).
//!
//! Drives a single Chromium page over the DevTools protocol: navigation is
//! bounded by the page-load timeout, element lookup polls the selector list
//! until the locate timeout expires, and capture takes an element screenshot.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::{ContentElement, PageHandle, Session, SessionConfig, SessionError};

/// Pause between selector polling rounds.
const LOCATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Reads the attributes the classifier needs in one round trip.
const DESCRIBE_JS: &str = "function() {
    const img = this.tagName === 'IMG' ? this : (this.querySelector('img') || this);
    return JSON.stringify({
        tag: this.tagName,
        src: img.currentSrc || img.src || null,
        alt: img.alt || null,
        width: img.naturalWidth || null,
        height: img.naturalHeight || null,
    });
}";

#[derive(Debug, Deserialize)]
struct Described {
    tag: String,
    src: Option<String>,
    alt: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Session backed by one Chromium page.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    locate_timeout: Duration,
    page_load_timeout: Duration,
    /// Element found by the last successful `locate`.
    located: Option<Element>,
}

impl std::fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSession")
            .field("locate_timeout", &self.locate_timeout)
            .field("page_load_timeout", &self.page_load_timeout)
            .finish_non_exhaustive()
    }
}

impl BrowserSession {
    /// Launches Chromium with `config` and opens a blank page.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Acquire`] if the browser cannot be launched.
    #[instrument(level = "debug", skip(config), fields(headless = config.headless))]
    pub async fn launch(config: &SessionConfig) -> Result<Self, SessionError> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .viewport(Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
                ..Viewport::default()
            })
            .request_timeout(config.page_load_timeout)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", config.user_agent));
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(SessionError::acquire)?;

        let (browser, mut events) = Browser::launch(browser_config)
            .await
            .map_err(SessionError::acquire)?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(SessionError::acquire)?;

        debug!("browser session ready");
        Ok(Self {
            browser,
            page,
            handler,
            locate_timeout: config.locate_timeout,
            page_load_timeout: config.page_load_timeout,
            located: None,
        })
    }
}

#[async_trait]
impl Session for BrowserSession {
    fn name(&self) -> &str {
        "browser"
    }

    async fn navigate(&mut self, url: &str) -> Result<PageHandle, SessionError> {
        self.located = None;
        match tokio::time::timeout(self.page_load_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(SessionError::navigation(url, e)),
            Err(_) => return Err(SessionError::timeout(url)),
        }

        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.to_string());

        Ok(PageHandle {
            url: url.to_string(),
            final_url,
            html: None,
        })
    }

    async fn locate(
        &mut self,
        page: &PageHandle,
        selectors: &[String],
    ) -> Result<Option<ContentElement>, SessionError> {
        let deadline = Instant::now() + self.locate_timeout;

        loop {
            for selector in selectors {
                let Ok(found) = self.page.find_element(selector.as_str()).await else {
                    continue;
                };
                let (content, is_img) = describe(selector, &found, &page.url).await?;
                let target = if is_img {
                    found
                } else {
                    let nested = found.find_element("img").await;
                    nested.unwrap_or(found)
                };
                self.located = Some(target);
                return Ok(Some(content));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LOCATE_POLL_INTERVAL).await;
        }
    }

    async fn capture(
        &mut self,
        _element: &ContentElement,
        path: &Path,
    ) -> Result<u64, SessionError> {
        let Some(target) = self.located.as_ref() else {
            return Err(SessionError::capture(path, "no element located on current page"));
        };

        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("jpg" | "jpeg") => CaptureScreenshotFormat::Jpeg,
            Some("webp") => CaptureScreenshotFormat::Webp,
            _ => CaptureScreenshotFormat::Png,
        };

        let bytes = target
            .save_screenshot(format, path)
            .await
            .map_err(|e| SessionError::capture(path, e))?;
        Ok(bytes.len() as u64)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.located = None;
        let result = self.browser.close().await;
        if let Err(error) = self.browser.wait().await {
            warn!(error = %error, "browser process did not exit cleanly");
        }
        self.handler.abort();
        result
            .map(|_| ())
            .map_err(|e| SessionError::navigation("browser", e))
    }
}

/// Reads the located element's attributes and whether it is an `img` itself.
async fn describe(
    selector: &str,
    element: &Element,
    url: &str,
) -> Result<(ContentElement, bool), SessionError> {
    let returned = element
        .call_js_fn(DESCRIBE_JS, false)
        .await
        .map_err(|e| SessionError::locate(url, e))?;
    let json = returned
        .result
        .value
        .and_then(|value| value.as_str().map(String::from))
        .ok_or_else(|| SessionError::locate(url, "element description unavailable"))?;
    let described: Described =
        serde_json::from_str(&json).map_err(|e| SessionError::locate(url, e))?;

    Ok((
        ContentElement {
            selector: selector.to_string(),
            src: described.src,
            alt: described.alt,
            natural_width: described.width,
            natural_height: described.height,
        },
        described.tag.eq_ignore_ascii_case("img"),
    ))
}
