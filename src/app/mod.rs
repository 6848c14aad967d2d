//! Application runtime composition modules.

pub(crate) mod config_manager;
pub(crate) mod progress;
pub(crate) mod runtime;
pub(crate) mod terminal;
