//! Capture pipeline: the sequential fetch → classify → persist loop.
//!
//! For each identifier the pipeline reaches exactly one terminal
//! [`Outcome`]:
//!
//! ```text
//! Pending ─┬─ known dead ─────────────────────────────► Skipped
//!          └─ navigate ─┬─ fails ─────────────────────► FetchError
//!                       └─ locate ─┬─ fails / nothing ► FetchError
//!                                  └─ classify ─┬─ Removed ─► mark dead ─► Discarded
//!                                               └─ Live ─► capture ─┬─ fails ──────► Discarded
//!                                                                   ├─ too small ──► delete, mark dead ─► Discarded
//!                                                                   └─ ok ─────────► Persisted
//! ```
//!
//! Per-identifier faults never abort the run. Only setup faults (see
//! [`PipelineError`]) are returned as errors.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use crate::classifier::{Classifier, ContentElement, NO_CONTENT_FOUND, RemovalReason, Verdict};
use crate::config::ScanConfig;
use crate::dead_store::DeadStore;
use crate::identifier::Identifier;
use crate::session::{Session, SessionController};

/// Setup faults that prevent a run from starting.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The artifact directory could not be created.
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        /// Directory path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Why a fetched identifier produced no artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Classified as a removed placeholder and recorded dead.
    Removed(RemovalReason),
    /// The session could not materialize the artifact; not recorded dead.
    CaptureFailed(String),
    /// Classified as removed, but the dead record could not be updated.
    StoreFailed(String),
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Removed(reason) => write!(f, "removed: {reason}"),
            Self::CaptureFailed(reason) => write!(f, "capture failed: {reason}"),
            Self::StoreFailed(reason) => write!(f, "dead record not updated: {reason}"),
        }
    }
}

/// Terminal state of one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Already known dead; no network contact.
    Skipped,
    /// Navigation or content lookup failed; eligible again next run.
    FetchError(String),
    /// Fetched but nothing kept.
    Discarded(DiscardReason),
    /// Artifact written to this path.
    Persisted(PathBuf),
}

impl Outcome {
    /// True if producing this outcome involved a request.
    #[must_use]
    pub fn contacted_network(&self) -> bool {
        !matches!(self, Self::Skipped)
    }
}

/// Counters for one run. Owned by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Identifiers drawn, including skipped ones.
    pub attempted: u64,
    /// Artifacts kept.
    pub persisted: u64,
    /// Identifiers skipped as known dead.
    pub skipped: u64,
    /// Navigation or locate failures.
    pub fetch_errors: u64,
    /// Fetched identifiers that produced no artifact.
    pub discarded: u64,
    /// Identifiers newly recorded dead.
    pub marked_dead: u64,
    /// The run stopped early on a shutdown request.
    pub interrupted: bool,
}

impl RunStats {
    /// Tallies one terminal outcome.
    pub fn record(&mut self, outcome: &Outcome) {
        self.attempted += 1;
        match outcome {
            Outcome::Skipped => self.skipped += 1,
            Outcome::FetchError(_) => self.fetch_errors += 1,
            Outcome::Discarded(reason) => {
                self.discarded += 1;
                if matches!(reason, DiscardReason::Removed(_)) {
                    self.marked_dead += 1;
                }
            }
            Outcome::Persisted(_) => self.persisted += 1,
        }
    }
}

/// Cooperative stop request shared between the signal handler and the run.
///
/// The run checks it before drawing each identifier; the inter-request
/// sleep wakes as soon as it is triggered.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Idempotent.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` or until triggered. Returns true if woken early.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => false,
            () = notified => true,
        }
    }
}

/// Receives each outcome as the run progresses.
pub trait ProgressSink {
    /// Called once per identifier, after `stats` has been updated.
    fn on_outcome(&mut self, id: &Identifier, outcome: &Outcome, stats: &RunStats);
}

/// Progress sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_outcome(&mut self, _id: &Identifier, _outcome: &Outcome, _stats: &RunStats) {}
}

/// Settings the pipeline reads on every identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Address prefix each identifier is appended to.
    pub base_url: String,
    /// Content selectors handed to the session.
    pub selectors: Vec<String>,
    /// Artifact directory.
    pub output_dir: PathBuf,
    /// Artifact file extension.
    pub image_extension: String,
    /// Artifacts below this size are deleted and their identifier marked dead.
    pub min_artifact_bytes: u64,
    /// Pause between network-contacting identifiers.
    pub delay: Duration,
    /// Attempts between progress log lines; 0 disables them.
    pub progress_interval: u64,
}

impl From<&ScanConfig> for PipelineSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            selectors: config.selectors.clone(),
            output_dir: config.output_dir.clone(),
            image_extension: config.image_extension.clone(),
            min_artifact_bytes: config.min_artifact_bytes,
            delay: config.delay,
            progress_interval: config.progress_interval,
        }
    }
}

impl PipelineSettings {
    /// Address of the page behind `id`.
    #[must_use]
    pub fn page_url(&self, id: &Identifier) -> String {
        format!("{}{id}", self.base_url)
    }

    /// Where the artifact for `id` is written.
    #[must_use]
    pub fn artifact_path(&self, id: &Identifier) -> PathBuf {
        self.output_dir
            .join(format!("{id}.{}", self.image_extension))
    }
}

/// Drives one run over a borrowed session and dead store.
pub struct CapturePipeline<'a, S: Session> {
    session: &'a mut SessionController<S>,
    store: &'a mut DeadStore,
    classifier: &'a Classifier,
    settings: PipelineSettings,
}

impl<'a, S: Session> CapturePipeline<'a, S> {
    /// Prepares a run, creating the output directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::OutputDir`] if the directory cannot be created.
    pub fn new(
        session: &'a mut SessionController<S>,
        store: &'a mut DeadStore,
        classifier: &'a Classifier,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&settings.output_dir).map_err(|source| PipelineError::OutputDir {
            path: settings.output_dir.clone(),
            source,
        })?;
        Ok(Self {
            session,
            store,
            classifier,
            settings,
        })
    }

    /// Runs over `ids` until exhausted or `shutdown` is triggered.
    ///
    /// Bound the run by passing e.g. `generator.take(n)`.
    #[instrument(level = "debug", skip_all, fields(delay = ?self.settings.delay))]
    pub async fn run<I>(
        &mut self,
        ids: I,
        shutdown: &ShutdownSignal,
        progress: &mut dyn ProgressSink,
    ) -> RunStats
    where
        I: IntoIterator<Item = Identifier>,
    {
        let mut stats = RunStats::default();
        let mut ids = ids.into_iter().peekable();

        while let Some(id) = ids.next() {
            if shutdown.is_triggered() {
                stats.interrupted = true;
                break;
            }

            let outcome = self.process(&id).await;
            stats.record(&outcome);
            log_outcome(&id, &outcome, &stats);
            progress.on_outcome(&id, &outcome, &stats);

            let interval = self.settings.progress_interval;
            if interval > 0 && stats.attempted % interval == 0 {
                info!(
                    attempted = stats.attempted,
                    persisted = stats.persisted,
                    skipped = stats.skipped,
                    errors = stats.fetch_errors,
                    "Progress"
                );
            }

            if outcome.contacted_network()
                && !self.settings.delay.is_zero()
                && ids.peek().is_some()
                && shutdown.sleep(self.settings.delay).await
            {
                stats.interrupted = true;
                break;
            }
        }

        if shutdown.is_triggered() {
            stats.interrupted = true;
        }
        if stats.interrupted {
            info!(attempted = stats.attempted, "Run interrupted");
        }
        stats
    }

    /// Takes one identifier to its terminal outcome.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn process(&mut self, id: &Identifier) -> Outcome {
        if self.store.contains(id) {
            return Outcome::Skipped;
        }

        let url = self.settings.page_url(id);
        let page = match self.session.navigate(&url).await {
            Ok(page) => page,
            Err(error) => return Outcome::FetchError(error.to_string()),
        };

        let element = match self.session.locate(&page, &self.settings.selectors).await {
            Ok(element) => element,
            Err(error) => return Outcome::FetchError(error.to_string()),
        };

        let verdict = self.classifier.classify(element.as_ref());
        match next_step(verdict, element) {
            Step::Capture(element) => self.persist(id, &element).await,
            Step::MarkDead(reason) => self.discard_dead(id, reason),
            Step::Fail(message) => Outcome::FetchError(message),
        }
    }

    async fn persist(&mut self, id: &Identifier, element: &ContentElement) -> Outcome {
        let path = self.settings.artifact_path(id);

        let bytes = match self.session.capture(element, &path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                return Outcome::Discarded(DiscardReason::CaptureFailed(error.to_string()));
            }
        };

        if bytes < self.settings.min_artifact_bytes {
            remove_artifact(&path).await;
            return self.discard_dead(id, RemovalReason::ArtifactTooSmall { bytes });
        }

        Outcome::Persisted(path)
    }

    fn discard_dead(&mut self, id: &Identifier, reason: RemovalReason) -> Outcome {
        match self.store.mark_dead(id) {
            Ok(_) => Outcome::Discarded(DiscardReason::Removed(reason)),
            Err(error) => {
                warn!(id = %id, error = %error, "failed to record dead identifier");
                Outcome::Discarded(DiscardReason::StoreFailed(error.to_string()))
            }
        }
    }
}

/// What a fetched page leads to once classified.
#[derive(Debug, PartialEq)]
enum Step {
    Capture(ContentElement),
    MarkDead(RemovalReason),
    Fail(String),
}

/// Maps a verdict on a fetched page to the next step.
///
/// The page was already fetched here, so a `Skipped` verdict is a fault
/// rather than a skip.
fn next_step(verdict: Verdict, element: Option<ContentElement>) -> Step {
    match (verdict, element) {
        (Verdict::Live, Some(element)) => Step::Capture(element),
        (Verdict::Removed(reason), _) => Step::MarkDead(reason),
        (Verdict::Error(message), _) => Step::Fail(message),
        (Verdict::Live, None) => Step::Fail(NO_CONTENT_FOUND.to_string()),
        (Verdict::Skipped, _) => Step::Fail("skip verdict for a fetched page".to_string()),
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            path = %path.display(),
            error = %error,
            "failed to delete placeholder artifact"
        ),
    }
}

fn log_outcome(id: &Identifier, outcome: &Outcome, stats: &RunStats) {
    match outcome {
        Outcome::Skipped => debug!(id = %id, "skipped known dead identifier"),
        Outcome::FetchError(error) => debug!(id = %id, error = %error, "fetch failed"),
        Outcome::Discarded(reason) => debug!(id = %id, %reason, "discarded"),
        Outcome::Persisted(path) => info!(
            id = %id,
            path = %path.display(),
            persisted = stats.persisted,
            "Captured"
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identifier::IdentifierSpace;

    #[test]
    fn test_run_stats_record_tallies_each_outcome() {
        let mut stats = RunStats::default();
        stats.record(&Outcome::Skipped);
        stats.record(&Outcome::FetchError("timeout".into()));
        stats.record(&Outcome::Discarded(DiscardReason::Removed(
            RemovalReason::RemovedMarker,
        )));
        stats.record(&Outcome::Discarded(DiscardReason::CaptureFailed("x".into())));
        stats.record(&Outcome::Persisted(PathBuf::from("images/aa0000.png")));

        assert_eq!(stats.attempted, 5);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.fetch_errors, 1);
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.marked_dead, 1);
        assert_eq!(stats.persisted, 1);
    }

    #[test]
    fn test_only_skipped_avoids_network() {
        assert!(!Outcome::Skipped.contacted_network());
        assert!(Outcome::FetchError(String::new()).contacted_network());
        assert!(Outcome::Persisted(PathBuf::new()).contacted_network());
    }

    #[test]
    fn test_artifact_path_uses_identifier_and_extension() {
        let settings = PipelineSettings::from(&ScanConfig::default());
        let id = IdentifierSpace::default().parse("xy0042").unwrap();
        assert_eq!(
            settings.artifact_path(&id),
            PathBuf::from("images/xy0042.png")
        );
    }

    #[test]
    fn test_page_url_appends_identifier() {
        let settings = PipelineSettings::from(&ScanConfig::default());
        let id = IdentifierSpace::default().parse("ab1234").unwrap();
        assert_eq!(settings.page_url(&id), "https://prnt.sc/ab1234");
    }

    // ==================== Verdict Mapping Tests ====================

    fn element() -> ContentElement {
        ContentElement {
            selector: ".screenshot-image".to_string(),
            src: Some("https://image.prntscr.com/image/abc.png".to_string()),
            ..ContentElement::default()
        }
    }

    #[test]
    fn test_live_verdict_with_element_goes_to_capture() {
        assert_eq!(
            next_step(Verdict::Live, Some(element())),
            Step::Capture(element())
        );
    }

    #[test]
    fn test_removed_verdict_marks_dead() {
        assert_eq!(
            next_step(Verdict::Removed(RemovalReason::RemovedMarker), Some(element())),
            Step::MarkDead(RemovalReason::RemovedMarker)
        );
    }

    #[test]
    fn test_fetched_page_never_maps_to_skip() {
        assert!(matches!(next_step(Verdict::Skipped, Some(element())), Step::Fail(_)));
        assert_eq!(
            next_step(Verdict::Live, None),
            Step::Fail(NO_CONTENT_FOUND.to_string())
        );
        assert_eq!(
            next_step(Verdict::Error("timeout".to_string()), None),
            Step::Fail("timeout".to_string())
        );
    }

    #[test]
    fn test_run_stats_serializes_as_json() {
        let stats = RunStats {
            attempted: 3,
            fetch_errors: 3,
            ..RunStats::default()
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["attempted"], 3);
        assert_eq!(json["persisted"], 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_sleep_early() {
        let shutdown = ShutdownSignal::new();
        let trigger = shutdown.clone();

        let handle = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let woke_early = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(woke_early);
    }

    #[tokio::test]
    async fn test_sleep_returns_immediately_when_already_triggered() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        assert!(shutdown.sleep(Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn test_sleep_runs_full_duration_without_trigger() {
        let shutdown = ShutdownSignal::new();
        assert!(!shutdown.sleep(Duration::from_millis(5)).await);
    }
}
