//! Tombstone detection for located content elements.
//!
//! The origin serves a small stand-in image when a capture has been removed.
//! [`Classifier::classify`] recognises it with an ordered list of rules where
//! the first match wins:
//!
//! 1. no content element located → [`Verdict::Error`]
//! 2. source URL matches a tombstone pattern → [`Verdict::Removed`]
//! 3. alt text carries the removed marker → [`Verdict::Removed`]
//! 4. known intrinsic dimensions below the minimum → [`Verdict::Removed`]
//! 5. otherwise → [`Verdict::Live`] (tentative; the pipeline re-checks the
//!    byte size once the artifact is on disk)
//!
//! Rule order is a tie-break and must not be rearranged.

use std::fmt;

use regex::Regex;
use thiserror::Error;
use tracing::trace;

/// Default source patterns for removed-capture placeholders.
pub const DEFAULT_TOMBSTONE_PATTERNS: &[&str] = &[
    r"(?i)/img/0_173a7b_211be8ff\.png",
    r"(?i)//i\.imgur\.com/removed\.png",
];

/// Default case-insensitive marker looked for in alt text.
pub const DEFAULT_REMOVED_MARKER: &str = "removed";

/// Default minimum width/height for a live image, in pixels.
pub const DEFAULT_MIN_DIMENSION: u32 = 100;

/// Message carried by the no-content error verdict.
pub const NO_CONTENT_FOUND: &str = "no content found";

/// Error building a classifier from configuration.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// A tombstone pattern is not a valid regular expression.
    #[error("invalid tombstone pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// The regex compile error.
        #[source]
        source: regex::Error,
    },
}

/// The content element a session located on a fetched page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentElement {
    /// Selector that matched.
    pub selector: String,
    /// Absolute source URL of the image, if any.
    pub src: Option<String>,
    /// Alt / descriptive text, if any.
    pub alt: Option<String>,
    /// Intrinsic width in pixels, when known before capture.
    pub natural_width: Option<u32>,
    /// Intrinsic height in pixels, when known before capture.
    pub natural_height: Option<u32>,
}

/// Why a resource was judged to be a removed placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// Source URL matched a tombstone pattern.
    TombstoneSource {
        /// The pattern that matched.
        pattern: String,
    },
    /// Alt text contained the removed marker.
    RemovedMarker,
    /// Intrinsic dimensions below the minimum.
    TooSmall {
        /// Intrinsic width.
        width: u32,
        /// Intrinsic height.
        height: u32,
    },
    /// Materialized artifact below the minimum byte size.
    ArtifactTooSmall {
        /// Bytes written.
        bytes: u64,
    },
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TombstoneSource { pattern } => write!(f, "tombstone source ({pattern})"),
            Self::RemovedMarker => f.write_str("removed marker in alt text"),
            Self::TooSmall { width, height } => write!(f, "placeholder size {width}x{height}"),
            Self::ArtifactTooSmall { bytes } => write!(f, "artifact only {bytes} bytes"),
        }
    }
}

/// Classification outcome for one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Live content (tentative until the artifact size is checked).
    Live,
    /// Removed placeholder; the identifier is dead.
    Removed(RemovalReason),
    /// Already known dead; nothing was fetched.
    Skipped,
    /// Transient or ambiguous failure; the identifier may be retried in a later run.
    Error(String),
}

type Rule = fn(&Classifier, &ContentElement) -> Option<RemovalReason>;

/// Removal rules in precedence order (rules 2-4).
const RULES: [(&str, Rule); 3] = [
    ("tombstone_source", Classifier::tombstone_source),
    ("removed_marker", Classifier::removed_marker),
    ("min_dimension", Classifier::below_min_dimension),
];

/// Ordered first-match classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    tombstones: Vec<Regex>,
    removed_marker: String,
    min_dimension: u32,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            tombstones: DEFAULT_TOMBSTONE_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            removed_marker: DEFAULT_REMOVED_MARKER.to_string(),
            min_dimension: DEFAULT_MIN_DIMENSION,
        }
    }
}

impl Classifier {
    /// Builds a classifier from tombstone patterns, a marker and a size floor.
    ///
    /// An empty marker disables rule 3; a zero `min_dimension` disables rule 4.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::InvalidPattern`] for the first pattern that
    /// does not compile.
    pub fn new<S: AsRef<str>>(
        tombstone_patterns: &[S],
        removed_marker: &str,
        min_dimension: u32,
    ) -> Result<Self, ClassifierError> {
        let tombstones = tombstone_patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| ClassifierError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tombstones,
            removed_marker: removed_marker.to_lowercase(),
            min_dimension,
        })
    }

    /// Classifies the element located on a fetched page.
    ///
    /// `None` means no qualifying element was found within the locate wait.
    #[must_use]
    pub fn classify(&self, element: Option<&ContentElement>) -> Verdict {
        let Some(element) = element else {
            return Verdict::Error(NO_CONTENT_FOUND.to_string());
        };

        for (name, rule) in RULES {
            if let Some(reason) = rule(self, element) {
                trace!(rule = name, %reason, "removal rule matched");
                return Verdict::Removed(reason);
            }
        }
        Verdict::Live
    }

    fn tombstone_source(&self, element: &ContentElement) -> Option<RemovalReason> {
        let src = element.src.as_deref()?;
        self.tombstones
            .iter()
            .find(|re| re.is_match(src))
            .map(|re| RemovalReason::TombstoneSource {
                pattern: re.as_str().to_string(),
            })
    }

    fn removed_marker(&self, element: &ContentElement) -> Option<RemovalReason> {
        if self.removed_marker.is_empty() {
            return None;
        }
        let alt = element.alt.as_deref()?;
        alt.to_lowercase()
            .contains(&self.removed_marker)
            .then_some(RemovalReason::RemovedMarker)
    }

    fn below_min_dimension(&self, element: &ContentElement) -> Option<RemovalReason> {
        let (Some(width), Some(height)) = (element.natural_width, element.natural_height) else {
            return None;
        };
        (width < self.min_dimension || height < self.min_dimension)
            .then_some(RemovalReason::TooSmall { width, height })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn element(src: &str) -> ContentElement {
        ContentElement {
            selector: ".screenshot-image".to_string(),
            src: Some(src.to_string()),
            alt: Some("Lightshot screenshot".to_string()),
            natural_width: Some(1280),
            natural_height: Some(720),
        }
    }

    #[test]
    fn test_missing_element_is_error_not_removed() {
        let verdict = Classifier::default().classify(None);
        assert_eq!(verdict, Verdict::Error(NO_CONTENT_FOUND.to_string()));
    }

    #[test]
    fn test_ordinary_image_is_live() {
        let verdict = Classifier::default().classify(Some(&element(
            "https://image.prntscr.com/image/abc123.png",
        )));
        assert_eq!(verdict, Verdict::Live);
    }

    #[test]
    fn test_tombstone_source_is_removed_even_when_large() {
        let el = element("//st.prntscr.com/2023/07/24/0635/img/0_173a7b_211be8ff.png");
        let verdict = Classifier::default().classify(Some(&el));
        assert!(
            matches!(verdict, Verdict::Removed(RemovalReason::TombstoneSource { .. })),
            "{verdict:?}"
        );
    }

    #[test]
    fn test_tombstone_source_wins_over_small_dimensions() {
        let mut el = element("https://i.imgur.com/removed.png");
        el.natural_width = Some(10);
        el.natural_height = Some(10);
        let verdict = Classifier::default().classify(Some(&el));
        assert!(matches!(
            verdict,
            Verdict::Removed(RemovalReason::TombstoneSource { .. })
        ));
    }

    #[test]
    fn test_removed_marker_is_case_insensitive() {
        let mut el = element("https://image.prntscr.com/image/abc.png");
        el.alt = Some("This Screenshot Was REMOVED".to_string());
        let verdict = Classifier::default().classify(Some(&el));
        assert_eq!(verdict, Verdict::Removed(RemovalReason::RemovedMarker));
    }

    #[test]
    fn test_marker_precedes_dimension_rule() {
        let mut el = element("https://image.prntscr.com/image/abc.png");
        el.alt = Some("removed".to_string());
        el.natural_width = Some(1);
        let verdict = Classifier::default().classify(Some(&el));
        assert_eq!(verdict, Verdict::Removed(RemovalReason::RemovedMarker));
    }

    #[test]
    fn test_either_dimension_below_minimum_is_removed() {
        let mut el = element("https://image.prntscr.com/image/abc.png");
        el.natural_width = Some(161);
        el.natural_height = Some(81);
        let verdict = Classifier::default().classify(Some(&el));
        assert_eq!(
            verdict,
            Verdict::Removed(RemovalReason::TooSmall {
                width: 161,
                height: 81
            })
        );
    }

    #[test]
    fn test_unknown_dimensions_do_not_trigger_size_rule() {
        let mut el = element("https://image.prntscr.com/image/abc.png");
        el.natural_width = Some(5);
        el.natural_height = None;
        assert_eq!(Classifier::default().classify(Some(&el)), Verdict::Live);
    }

    #[test]
    fn test_custom_rules_and_disabled_marker() {
        let classifier = Classifier::new(&["placeholder"], "", 0).unwrap();

        let mut el = element("https://cdn.example.com/placeholder.gif");
        assert!(matches!(
            classifier.classify(Some(&el)),
            Verdict::Removed(RemovalReason::TombstoneSource { .. })
        ));

        el.src = Some("https://cdn.example.com/real.png".to_string());
        el.alt = Some("removed".to_string());
        el.natural_width = Some(1);
        el.natural_height = Some(1);
        assert_eq!(classifier.classify(Some(&el)), Verdict::Live);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let err = Classifier::new(&["(unclosed"], "removed", 100).unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }
}
