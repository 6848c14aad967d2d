//! Resolves the effective run configuration from all layers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use shotscan_core::config::resolve_default_config_path;
use shotscan_core::{FileConfig, ScanConfig};

use crate::cli::Args;

/// Result of config resolution, kept for startup logging.
#[derive(Debug)]
pub(crate) struct ResolvedConfig {
    pub(crate) config: ScanConfig,
    /// File the config was read from, if any.
    pub(crate) source: Option<PathBuf>,
}

/// Defaults < profile < config file < CLI flags, then validation.
///
/// An explicit `--config` must exist; the default location is optional.
pub(crate) fn resolve_config(args: &Args) -> Result<ResolvedConfig> {
    let (file, source) = match &args.config {
        Some(path) => (Some(FileConfig::load(path)?), Some(path.clone())),
        None => match resolve_default_config_path().filter(|path| path.is_file()) {
            Some(path) => (Some(FileConfig::load(&path)?), Some(path)),
            None => (None, None),
        },
    };

    let mut config = ScanConfig::layered(args.profile, file.as_ref())?;
    args.apply_to(&mut config);
    config.validate().context("Invalid configuration")?;

    Ok(ResolvedConfig { config, source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use clap::Parser;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_cli_flags_beat_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_attempts = 500\ndelay = 3.0\n").unwrap();
        let config_arg = path.to_string_lossy().into_owned();

        let args =
            Args::try_parse_from(["shotscan", "--config", &config_arg, "--max-attempts", "7"])
                .unwrap();
        let resolved = resolve_config(&args).unwrap();

        assert_eq!(resolved.config.max_attempts, 7);
        assert_eq!(resolved.config.delay, Duration::from_secs(3));
        assert_eq!(resolved.source, Some(path));
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        let args =
            Args::try_parse_from(["shotscan", "--config", "/nonexistent/shotscan.toml"]).unwrap();
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn test_invalid_cli_value_fails_validation() {
        let args = Args::try_parse_from(["shotscan", "--base-url", "not a url"]).unwrap();
        let err = resolve_config(&args).unwrap_err();
        assert!(format!("{err:#}").contains("base_url"), "{err:#}");
    }
}
