//! Layered run configuration.
//!
//! Values are resolved lowest to highest precedence:
//!
//! 1. built-in defaults ([`ScanConfig::default`])
//! 2. a named [`Profile`]
//! 3. a TOML config file ([`FileConfig`])
//! 4. command-line flags (applied by the binary)
//!
//! [`ScanConfig::validate`] runs once all layers are applied.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use image::ImageFormat;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::classifier::{
    Classifier, ClassifierError, DEFAULT_MIN_DIMENSION, DEFAULT_REMOVED_MARKER,
    DEFAULT_TOMBSTONE_PATTERNS,
};
use crate::identifier::{DEFAULT_PREFIX_LEN, DEFAULT_SUFFIX_LEN, IdentifierError, IdentifierSpace};
use crate::session::{
    DEFAULT_LOCATE_TIMEOUT, DEFAULT_PAGE_LOAD_TIMEOUT, DEFAULT_SELECTORS, DEFAULT_USER_AGENT,
    DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_WIDTH, SessionConfig,
};

/// Default address prefix; the identifier is appended verbatim.
pub const DEFAULT_BASE_URL: &str = "https://prnt.sc/";

/// Default artifact directory.
pub const DEFAULT_OUTPUT_DIR: &str = "images";

/// Default number of identifiers drawn per run.
pub const DEFAULT_MAX_ATTEMPTS: u64 = 1000;

/// Default pause after each identifier that contacted the network.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Delays below this are allowed but logged as a warning.
pub const MINIMUM_RECOMMENDED_DELAY: Duration = Duration::from_millis(500);

/// Artifacts smaller than this many bytes are treated as placeholders.
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 1024;

/// Default artifact file extension.
pub const DEFAULT_IMAGE_EXTENSION: &str = "png";

/// Default number of attempts between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

/// Default log level when nothing else selects one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Dead-list location relative to the output directory.
const DEFAULT_DEAD_LIST: &str = ".shotscan/dead_ids.txt";

/// Upper bound on the inter-request delay.
const MAX_DELAY_SECS: f64 = 3600.0;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown/mistyped keys.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Path of the config file (empty for in-memory input).
        path: PathBuf,
        /// The TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or malformed.
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        /// Config key.
        field: &'static str,
        /// What is wrong and what is expected.
        message: String,
    },

    /// Profile name not recognised.
    #[error("unknown profile '{0}'. Expected one of: development, production")]
    UnknownProfile(String),

    /// Tombstone patterns did not compile.
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    /// Identifier shape is unusable.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}

impl ConfigError {
    /// Creates a validation error for `field`.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Named preset applied on top of the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Visible browser, debug logging, gentle pacing, short runs.
    Development,
    /// Headless, info logging, longer runs.
    Production,
}

impl Profile {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    fn apply(self, config: &mut ScanConfig) {
        match self {
            Self::Development => {
                config.log_level = "debug".to_string();
                config.headless = false;
                config.delay = Duration::from_secs(2);
                config.max_attempts = 100;
            }
            Self::Production => {
                config.log_level = "info".to_string();
                config.headless = true;
                config.delay = Duration::from_millis(1500);
                config.max_attempts = 10_000;
            }
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::UnknownProfile(other.to_string())),
        }
    }
}

/// TOML file layer. Every key is optional; unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Profile applied before the rest of this file.
    pub profile: Option<Profile>,
    /// Address prefix the identifier is appended to.
    pub base_url: Option<String>,
    /// Artifact directory.
    pub output_dir: Option<PathBuf>,
    /// Dead-identifier record path.
    pub dead_list: Option<PathBuf>,
    /// Identifiers drawn per run.
    pub max_attempts: Option<u64>,
    /// Inter-request delay in seconds.
    pub delay: Option<f64>,
    /// Hide the browser window.
    pub headless: Option<bool>,
    /// Viewport width in pixels.
    pub viewport_width: Option<u32>,
    /// Viewport height in pixels.
    pub viewport_height: Option<u32>,
    /// Page-load timeout in seconds.
    pub page_load_timeout_secs: Option<u64>,
    /// Content locate wait in seconds.
    pub locate_timeout_secs: Option<u64>,
    /// Request identity.
    pub user_agent: Option<String>,
    /// Content selectors, tried in order.
    pub selectors: Option<Vec<String>>,
    /// Tombstone source URL patterns (regular expressions).
    pub tombstone_patterns: Option<Vec<String>>,
    /// Alt-text marker for removed content; empty disables the rule.
    pub removed_marker: Option<String>,
    /// Minimum live width/height in pixels; 0 disables the rule.
    pub min_dimension: Option<u32>,
    /// Minimum live artifact size in bytes.
    pub min_artifact_bytes: Option<u64>,
    /// Artifact extension (selects the encoding).
    pub image_extension: Option<String>,
    /// Letters in the identifier prefix.
    pub prefix_len: Option<u32>,
    /// Digits in the identifier suffix.
    pub suffix_len: Option<u32>,
    /// Attempts between progress log lines.
    pub progress_interval: Option<u64>,
    /// Default log level.
    pub log_level: Option<String>,
    /// Also write the log to this file.
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML, unknown keys or
    /// mistyped values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })
    }

    /// Reads and parses the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    /// Address prefix each identifier is appended to.
    pub base_url: String,
    /// Artifact directory.
    pub output_dir: PathBuf,
    /// Explicit dead-list path; `None` uses the default under `output_dir`.
    pub dead_list: Option<PathBuf>,
    /// Identifiers drawn per run.
    pub max_attempts: u64,
    /// Pause after each identifier that contacted the network.
    pub delay: Duration,
    /// Hide the browser window.
    pub headless: bool,
    /// Viewport width in pixels.
    pub viewport_width: u32,
    /// Viewport height in pixels.
    pub viewport_height: u32,
    /// Bound on one navigation.
    pub page_load_timeout: Duration,
    /// Bound on waiting for a content element; shorter than `page_load_timeout`.
    pub locate_timeout: Duration,
    /// Request identity.
    pub user_agent: String,
    /// Content selectors, tried in order.
    pub selectors: Vec<String>,
    /// Tombstone source URL patterns (regular expressions).
    pub tombstone_patterns: Vec<String>,
    /// Alt-text marker for removed content; empty disables the rule.
    pub removed_marker: String,
    /// Minimum live width/height in pixels; 0 disables the rule.
    pub min_dimension: u32,
    /// Artifacts smaller than this are placeholders.
    pub min_artifact_bytes: u64,
    /// Artifact extension (selects the encoding).
    pub image_extension: String,
    /// Letters in the identifier prefix.
    pub prefix_len: u32,
    /// Digits in the identifier suffix.
    pub suffix_len: u32,
    /// Attempts between progress log lines.
    pub progress_interval: u64,
    /// Log level used when neither `RUST_LOG` nor `-q`/`-v` is given.
    pub log_level: String,
    /// Also write the log to this file.
    pub log_file: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            dead_list: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
            headless: true,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            page_load_timeout: DEFAULT_PAGE_LOAD_TIMEOUT,
            locate_timeout: DEFAULT_LOCATE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            selectors: DEFAULT_SELECTORS.iter().map(|s| (*s).to_string()).collect(),
            tombstone_patterns: DEFAULT_TOMBSTONE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            removed_marker: DEFAULT_REMOVED_MARKER.to_string(),
            min_dimension: DEFAULT_MIN_DIMENSION,
            min_artifact_bytes: DEFAULT_MIN_ARTIFACT_BYTES,
            image_extension: DEFAULT_IMAGE_EXTENSION.to_string(),
            prefix_len: DEFAULT_PREFIX_LEN,
            suffix_len: DEFAULT_SUFFIX_LEN,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_file: None,
        }
    }
}

impl ScanConfig {
    /// Builds a config from defaults, an optional profile and an optional file.
    ///
    /// `profile` wins over a profile named inside `file`. The profile is
    /// applied before the file's own values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a file value cannot be converted
    /// (e.g. a negative delay). Range checks happen in [`validate`](Self::validate).
    pub fn layered(
        profile: Option<Profile>,
        file: Option<&FileConfig>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(profile) = profile.or_else(|| file.and_then(|f| f.profile)) {
            debug!(profile = %profile, "applying profile");
            profile.apply(&mut config);
        }
        if let Some(file) = file {
            config.apply_file(file)?;
        }
        Ok(config)
    }

    /// Overlays every key set in `file`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a delay that is not a finite,
    /// non-negative number of seconds.
    pub fn apply_file(&mut self, file: &FileConfig) -> Result<(), ConfigError> {
        if let Some(value) = &file.base_url {
            self.base_url.clone_from(value);
        }
        if let Some(value) = &file.output_dir {
            self.output_dir.clone_from(value);
        }
        if let Some(value) = &file.dead_list {
            self.dead_list = Some(value.clone());
        }
        if let Some(value) = file.max_attempts {
            self.max_attempts = value;
        }
        if let Some(value) = file.delay {
            self.delay = delay_from_secs(value)?;
        }
        if let Some(value) = file.headless {
            self.headless = value;
        }
        if let Some(value) = file.viewport_width {
            self.viewport_width = value;
        }
        if let Some(value) = file.viewport_height {
            self.viewport_height = value;
        }
        if let Some(value) = file.page_load_timeout_secs {
            self.page_load_timeout = Duration::from_secs(value);
        }
        if let Some(value) = file.locate_timeout_secs {
            self.locate_timeout = Duration::from_secs(value);
        }
        if let Some(value) = &file.user_agent {
            self.user_agent.clone_from(value);
        }
        if let Some(value) = &file.selectors {
            self.selectors.clone_from(value);
        }
        if let Some(value) = &file.tombstone_patterns {
            self.tombstone_patterns.clone_from(value);
        }
        if let Some(value) = &file.removed_marker {
            self.removed_marker.clone_from(value);
        }
        if let Some(value) = file.min_dimension {
            self.min_dimension = value;
        }
        if let Some(value) = file.min_artifact_bytes {
            self.min_artifact_bytes = value;
        }
        if let Some(value) = &file.image_extension {
            self.image_extension.clone_from(value);
        }
        if let Some(value) = file.prefix_len {
            self.prefix_len = value;
        }
        if let Some(value) = file.suffix_len {
            self.suffix_len = value;
        }
        if let Some(value) = file.progress_interval {
            self.progress_interval = value;
        }
        if let Some(value) = &file.log_level {
            self.log_level.clone_from(value);
        }
        if let Some(value) = &file.log_file {
            self.log_file = Some(value.clone());
        }
        Ok(())
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid("base_url", format!("'{}': {e}", self.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "base_url",
                format!("'{}'. Expected an http or https URL", self.base_url),
            ));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("output_dir", "must not be empty"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "0. Expected at least 1"));
        }
        if self.delay.as_secs_f64() > MAX_DELAY_SECS {
            return Err(ConfigError::invalid(
                "delay",
                format!("{:.3}. Expected range: 0..={MAX_DELAY_SECS}", self.delay.as_secs_f64()),
            ));
        }

        validate_range("viewport_width", u64::from(self.viewport_width), 1, 10_000)?;
        validate_range("viewport_height", u64::from(self.viewport_height), 1, 10_000)?;
        validate_range(
            "page_load_timeout_secs",
            self.page_load_timeout.as_secs(),
            1,
            3600,
        )?;
        validate_range("locate_timeout_secs", self.locate_timeout.as_secs(), 0, 3600)?;
        if self.locate_timeout >= self.page_load_timeout {
            return Err(ConfigError::invalid(
                "locate_timeout_secs",
                format!(
                    "{}. Must be shorter than page_load_timeout_secs ({})",
                    self.locate_timeout.as_secs(),
                    self.page_load_timeout.as_secs()
                ),
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::invalid("user_agent", "must not be empty"));
        }
        if self.selectors.is_empty() {
            return Err(ConfigError::invalid("selectors", "at least one selector is required"));
        }
        for selector in &self.selectors {
            scraper::Selector::parse(selector).map_err(|e| {
                ConfigError::invalid(
                    "selectors",
                    format!("'{selector}' is not a CSS selector: {e}"),
                )
            })?;
        }
        self.classifier()?;

        if ImageFormat::from_extension(&self.image_extension).is_none() {
            return Err(ConfigError::invalid(
                "image_extension",
                format!("'{}' is not a known image format", self.image_extension),
            ));
        }

        self.identifier_space()?;
        if self.progress_interval == 0 {
            return Err(ConfigError::invalid("progress_interval", "0. Expected at least 1"));
        }
        if tracing::Level::from_str(&self.log_level).is_err() {
            return Err(ConfigError::invalid(
                "log_level",
                format!(
                    "'{}'. Expected one of: trace, debug, info, warn, error",
                    self.log_level
                ),
            ));
        }
        Ok(())
    }

    /// True when the delay is below [`MINIMUM_RECOMMENDED_DELAY`].
    #[must_use]
    pub fn delay_below_recommended(&self) -> bool {
        self.delay < MINIMUM_RECOMMENDED_DELAY
    }

    /// Session settings derived from this config.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            headless: self.headless,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            page_load_timeout: self.page_load_timeout,
            locate_timeout: self.locate_timeout,
            user_agent: self.user_agent.clone(),
        }
    }

    /// Classifier built from the configured rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Classifier`] if a tombstone pattern is invalid.
    pub fn classifier(&self) -> Result<Classifier, ConfigError> {
        Ok(Classifier::new(
            self.tombstone_patterns.as_slice(),
            &self.removed_marker,
            self.min_dimension,
        )?)
    }

    /// Identifier space for the configured shape.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Identifier`] for an empty or oversized shape.
    pub fn identifier_space(&self) -> Result<IdentifierSpace, ConfigError> {
        Ok(IdentifierSpace::new(self.prefix_len, self.suffix_len)?)
    }

    /// Effective dead-identifier record path.
    #[must_use]
    pub fn dead_list_path(&self) -> PathBuf {
        self.dead_list
            .clone()
            .unwrap_or_else(|| self.output_dir.join(DEFAULT_DEAD_LIST))
    }
}

/// Converts a delay in seconds, rejecting negative and non-finite values.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for `delay`.
pub fn delay_from_secs(secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::invalid(
            "delay",
            format!("{secs}. Expected a non-negative number of seconds"),
        ));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::invalid("delay", e.to_string()))
}

fn validate_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value}. Expected range: {min}..={max}")))
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/shotscan/config.toml`
/// 2. `$HOME/.config/shotscan/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    default_config_path_from(env::var_os("XDG_CONFIG_HOME"), env::var_os("HOME"))
}

fn default_config_path_from(
    xdg_config_home: Option<OsString>,
    home: Option<OsString>,
) -> Option<PathBuf> {
    if let Some(xdg) = xdg_config_home.filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("shotscan").join("config.toml"));
    }
    let home = home.filter(|v| !v.is_empty())?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("shotscan")
            .join("config.toml"),
    )
}
