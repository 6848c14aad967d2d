//! Session Controller: the single rendering/fetch session used by a run.
//!
//! The pipeline only talks to a [`Session`] through a [`SessionController`],
//! which owns the session for the whole run and guarantees it is released
//! exactly once. Backends:
//!
//! - [`HttpSession`] - plain HTTP fetch with HTML parsing (default)
//! - `BrowserSession` - headless Chromium, behind the `browser` feature
//!
//! # Example
//!
//! ```no_run
//! use shotscan_core::session::{HttpSession, SessionConfig, SessionController};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = HttpSession::connect(&SessionConfig::default())?;
//! let mut controller = SessionController::new(session);
//! let page = controller.navigate("https://prnt.sc/aa0000").await?;
//! println!("fetched {}", page.final_url);
//! controller.release().await;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "browser")]
mod browser;
mod http;

#[cfg(feature = "browser")]
pub use browser::BrowserSession;
pub use http::HttpSession;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub use crate::classifier::ContentElement;

/// Default page-load timeout (10 seconds).
pub const DEFAULT_PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on waiting for a content element (5 seconds).
pub const DEFAULT_LOCATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default viewport width.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1920;

/// Default viewport height.
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1080;

/// Desktop browser identity sent with every request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Selectors tried in order when looking for the capture on a page.
pub const DEFAULT_SELECTORS: &[&str] = &[
    ".screenshot-image",
    "#screenshot-image",
    ".image",
    "img[src*='image']",
    ".image-container img",
    ".no-click",
    "#screenshot img",
];

/// Errors surfaced by a session. Only [`SessionError::Acquire`] is fatal to a run.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session could not be started at all.
    #[error("failed to start session: {reason}")]
    Acquire {
        /// What went wrong.
        reason: String,
    },

    /// Page load exceeded the page-load timeout.
    #[error("timeout loading {url}")]
    Timeout {
        /// The URL being loaded.
        url: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} loading {url}")]
    HttpStatus {
        /// The URL being loaded.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Transport or driver failure while talking to `url`.
    #[error("session error loading {url}: {reason}")]
    Navigation {
        /// The URL being loaded.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// The page could not be inspected for content.
    #[error("failed to inspect {url}: {reason}")]
    Locate {
        /// Page URL.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// The located element could not be captured.
    #[error("failed to capture {path}: {reason}")]
    Capture {
        /// Destination path.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// Writing the artifact failed.
    #[error("IO error writing {path}: {source}")]
    Io {
        /// Destination path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The session has already been released.
    #[error("session already released")]
    Released,
}

impl SessionError {
    /// Creates an acquisition error.
    pub fn acquire(reason: impl ToString) -> Self {
        Self::Acquire {
            reason: reason.to_string(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a navigation error.
    pub fn navigation(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Navigation {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a locate error.
    pub fn locate(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Locate {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a capture error.
    pub fn capture(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Capture {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Settings applied when a session is acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Run without a visible window.
    pub headless: bool,
    /// Viewport width in pixels.
    pub viewport_width: u32,
    /// Viewport height in pixels.
    pub viewport_height: u32,
    /// Bound on loading a page at all.
    pub page_load_timeout: Duration,
    /// Bound on finding the content element once the page is loaded.
    pub locate_timeout: Duration,
    /// Request identity (User-Agent).
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            page_load_timeout: DEFAULT_PAGE_LOAD_TIMEOUT,
            locate_timeout: DEFAULT_LOCATE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A loaded page.
#[derive(Debug, Clone)]
pub struct PageHandle {
    /// URL that was requested.
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    /// Page markup, for backends that fetch it up front.
    pub html: Option<String>,
}

/// Capability set the pipeline needs from a rendering/fetch backend.
///
/// Every fault during navigation, location or capture is returned as a
/// [`SessionError`]; a failed call must leave the session usable for the
/// next identifier.
///
/// # Object Safety
///
/// Uses `async_trait` so the binary can pick a backend at runtime via
/// `Box<dyn Session>`.
#[async_trait]
pub trait Session: Send {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Loads `url`, bounded by the page-load timeout.
    async fn navigate(&mut self, url: &str) -> Result<PageHandle, SessionError>;

    /// Finds the first element matching `selectors` (tried in order),
    /// bounded by the locate timeout. `Ok(None)` means nothing matched.
    async fn locate(
        &mut self,
        page: &PageHandle,
        selectors: &[String],
    ) -> Result<Option<ContentElement>, SessionError>;

    /// Materializes `element` as an image file at `path`, returning bytes written.
    async fn capture(&mut self, element: &ContentElement, path: &Path)
    -> Result<u64, SessionError>;

    /// Releases backend resources.
    async fn close(&mut self) -> Result<(), SessionError>;
}

#[async_trait]
impl<S: Session + ?Sized> Session for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn navigate(&mut self, url: &str) -> Result<PageHandle, SessionError> {
        (**self).navigate(url).await
    }

    async fn locate(
        &mut self,
        page: &PageHandle,
        selectors: &[String],
    ) -> Result<Option<ContentElement>, SessionError> {
        (**self).locate(page, selectors).await
    }

    async fn capture(
        &mut self,
        element: &ContentElement,
        path: &Path,
    ) -> Result<u64, SessionError> {
        (**self).capture(element, path).await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        (**self).close().await
    }
}

/// Exclusive owner of the run's session.
///
/// Calls after [`release`](Self::release) fail with
/// [`SessionError::Released`]; `release` itself is idempotent.
#[derive(Debug)]
pub struct SessionController<S: Session> {
    session: S,
    released: bool,
}

impl<S: Session> SessionController<S> {
    /// Takes ownership of an acquired session.
    pub fn new(session: S) -> Self {
        info!(backend = session.name(), "session acquired");
        Self {
            session,
            released: false,
        }
    }

    /// Returns true once the session has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Loads `url`.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`SessionError`].
    #[instrument(level = "debug", skip(self))]
    pub async fn navigate(&mut self, url: &str) -> Result<PageHandle, SessionError> {
        self.ensure_active()?;
        self.session.navigate(url).await
    }

    /// Finds the content element on `page`.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`SessionError`].
    #[instrument(level = "debug", skip(self, page, selectors), fields(url = %page.url))]
    pub async fn locate(
        &mut self,
        page: &PageHandle,
        selectors: &[String],
    ) -> Result<Option<ContentElement>, SessionError> {
        self.ensure_active()?;
        self.session.locate(page, selectors).await
    }

    /// Captures `element` to `path`.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`SessionError`].
    #[instrument(level = "debug", skip(self, element), fields(path = %path.display()))]
    pub async fn capture(
        &mut self,
        element: &ContentElement,
        path: &Path,
    ) -> Result<u64, SessionError> {
        self.ensure_active()?;
        self.session.capture(element, path).await
    }

    /// Releases the session. Failures are logged, never returned.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.session.close().await {
            Ok(()) => info!(backend = self.session.name(), "session closed"),
            Err(error) => warn!(
                backend = self.session.name(),
                error = %error,
                "error closing session"
            ),
        }
    }

    /// Borrows the underlying session.
    #[must_use]
    pub fn session(&self) -> &S {
        &self.session
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.released {
            Err(SessionError::Released)
        } else {
            Ok(())
        }
    }
}

impl<S: Session> Drop for SessionController<S> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                backend = self.session.name(),
                "session dropped without release"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingSession {
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    #[async_trait]
    impl Session for CountingSession {
        fn name(&self) -> &str {
            "counting"
        }

        async fn navigate(&mut self, url: &str) -> Result<PageHandle, SessionError> {
            Ok(PageHandle {
                url: url.to_string(),
                final_url: url.to_string(),
                html: None,
            })
        }

        async fn locate(
            &mut self,
            _page: &PageHandle,
            _selectors: &[String],
        ) -> Result<Option<ContentElement>, SessionError> {
            Ok(None)
        }

        async fn capture(
            &mut self,
            _element: &ContentElement,
            path: &Path,
        ) -> Result<u64, SessionError> {
            Err(SessionError::capture(path, "not supported"))
        }

        async fn close(&mut self) -> Result<(), SessionError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(SessionError::acquire("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn controller(fail_close: bool) -> (SessionController<CountingSession>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let session = CountingSession {
            closes: Arc::clone(&closes),
            fail_close,
        };
        (SessionController::new(session), closes)
    }

    #[tokio::test]
    async fn test_release_closes_exactly_once() {
        let (mut controller, closes) = controller(false);

        controller.release().await;
        controller.release().await;

        assert!(controller.is_released());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_failure_is_swallowed() {
        let (mut controller, closes) = controller(true);

        controller.release().await;

        assert!(controller.is_released());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_calls_after_release_fail() {
        let (mut controller, _closes) = controller(false);
        controller.release().await;

        let result = controller.navigate("https://example.com/").await;

        assert!(matches!(result, Err(SessionError::Released)));
    }

    #[tokio::test]
    async fn test_boxed_session_delegates() {
        let closes = Arc::new(AtomicUsize::new(0));
        let boxed: Box<dyn Session> = Box::new(CountingSession {
            closes: Arc::clone(&closes),
            fail_close: false,
        });
        let mut controller = SessionController::new(boxed);

        let page = controller.navigate("https://example.com/x").await.unwrap();
        assert_eq!(page.final_url, "https://example.com/x");
        controller.release().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert!(config.headless);
        assert_eq!((config.viewport_width, config.viewport_height), (1920, 1080));
        assert!(config.locate_timeout < config.page_load_timeout);
        assert!(config.user_agent.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn test_session_error_display_includes_context() {
        let msg = SessionError::http_status("https://prnt.sc/aa0000", 503).to_string();
        assert!(msg.contains("503") && msg.contains("aa0000"), "{msg}");

        let msg = SessionError::capture("/tmp/aa0000.png", "decode failed").to_string();
        assert!(msg.contains("/tmp/aa0000.png"), "{msg}");
    }
}
