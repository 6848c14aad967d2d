//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use shotscan_core::config::delay_from_secs;
use shotscan_core::{Profile, ScanConfig};

/// Fetch backend used for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Plain HTTP fetch and HTML parsing
    Http,
    /// Headless Chromium (requires the `browser` feature)
    Browser,
}

/// Walk short-link identifiers and keep the captures that still exist.
///
/// Shotscan enumerates identifiers in order, fetches the page behind each
/// one, saves live images, and remembers removed ones so they are never
/// fetched again.
#[derive(Parser, Debug)]
#[command(name = "shotscan")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/shotscan/config.toml if present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Preset applied before the config file (development, production)
    #[arg(long, value_name = "NAME")]
    pub profile: Option<Profile>,

    /// Directory for captured images [default: images]
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Dead-identifier record [default: <output-dir>/.shotscan/dead_ids.txt]
    #[arg(long, value_name = "PATH")]
    pub dead_list: Option<PathBuf>,

    /// Number of identifiers to draw [default: 1000]
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_attempts: Option<u64>,

    /// Seconds to wait after each fetched identifier [default: 1.0]
    #[arg(short, long, value_parser = parse_delay)]
    pub delay: Option<Duration>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub visible: bool,

    /// Start from this identifier instead of the first one
    #[arg(long, value_name = "ID")]
    pub start_at: Option<String>,

    /// Address prefix each identifier is appended to [default: https://prnt.sc/]
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Also write the log to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Fetch backend
    #[arg(long, value_enum, default_value_t = Backend::Http)]
    pub backend: Backend,
}

impl Args {
    /// Applies explicitly given flags on top of `config`.
    pub fn apply_to(&self, config: &mut ScanConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(path) = &self.dead_list {
            config.dead_list = Some(path.clone());
        }
        if let Some(max) = self.max_attempts {
            config.max_attempts = max;
        }
        if let Some(delay) = self.delay {
            config.delay = delay;
        }
        if self.visible {
            config.headless = false;
        }
        if let Some(url) = &self.base_url {
            config.base_url.clone_from(url);
        }
        if let Some(path) = &self.log_file {
            config.log_file = Some(path.clone());
        }
    }
}

fn parse_delay(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    delay_from_secs(secs).map_err(|e| e.to_string())
}
