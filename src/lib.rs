//! Shotscan Core Library
//!
//! This library provides the core functionality for the shotscan tool, which
//! walks a combinatorial space of short-link identifiers, fetches the page
//! behind each one, classifies it as live content or a removed placeholder,
//! and keeps a durable list of dead identifiers so they are never fetched
//! again.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`identifier`] - Identifier shape and the odometer-ordered generator
//! - [`dead_store`] - Durable, append-only set of dead identifiers
//! - [`classifier`] - Ordered first-match rules for tombstone detection
//! - [`session`] - Session Controller trait, lifecycle wrapper and backends
//! - [`pipeline`] - Sequential fetch/classify/persist loop and run counters
//! - [`config`] - Layered run configuration (defaults, profiles, TOML file)

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classifier;
pub mod config;
pub mod dead_store;
pub mod identifier;
pub mod pipeline;
pub mod session;

// Re-export commonly used types
pub use classifier::{Classifier, ClassifierError, ContentElement, RemovalReason, Verdict};
pub use config::{ConfigError, FileConfig, Profile, ScanConfig};
pub use dead_store::{DeadStore, StoreError};
pub use identifier::{Identifier, IdentifierError, IdentifierGenerator, IdentifierSpace};
pub use pipeline::{
    CapturePipeline, DiscardReason, NoProgress, Outcome, PipelineError, PipelineSettings,
    ProgressSink, RunStats, ShutdownSignal,
};
pub use session::{
    HttpSession, PageHandle, Session, SessionConfig, SessionController, SessionError,
};
