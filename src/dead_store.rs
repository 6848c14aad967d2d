//! Durable set of identifiers known to resolve to removed content.
//!
//! The record is a newline-delimited text file with one identifier per line.
//! It is read fully into memory at startup and only ever appended to. Every
//! [`DeadStore::mark_dead`] call writes and syncs the line before the
//! in-memory set is updated, so a crash after the call returns cannot lose
//! the entry.
//!
//! The store assumes it is the only writer of its file.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::identifier::{Identifier, IdentifierError, IdentifierSpace};

/// Errors from loading or appending to the dead-identifier record.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record exists but could not be read, or an append failed.
    #[error("IO error on dead-identifier record {path}: {source}")]
    Io {
        /// Path of the record.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The record contains a line that is not a valid identifier.
    #[error("dead-identifier record {path} is corrupt at line {line}: {source}")]
    Corrupt {
        /// Path of the record.
        path: PathBuf,
        /// 1-based line number of the bad entry.
        line: usize,
        /// Why the line was rejected.
        #[source]
        source: IdentifierError,
    },
}

impl StoreError {
    /// Creates an IO error for the record at `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Persisted, append-only set of dead identifiers.
#[derive(Debug)]
pub struct DeadStore {
    path: PathBuf,
    ids: HashSet<Identifier>,
    /// Append handle, opened lazily so a run that marks nothing never creates the file.
    writer: Option<File>,
    /// Set when the record ends with a complete entry but no newline.
    needs_newline: bool,
    /// Byte offset of a torn final entry, cut off before the next append.
    torn_offset: Option<u64>,
}

impl DeadStore {
    /// Loads the record at `path`, validating each line against `space`.
    ///
    /// A missing file is an empty store. Blank lines are ignored. A final
    /// line without a terminating newline that fails validation is treated
    /// as an interrupted append and dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read (or
    /// is not UTF-8) and [`StoreError::Corrupt`] for any other invalid line.
    #[instrument(level = "debug", skip(space), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>, space: &IdentifierSpace) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no dead-identifier record yet; starting empty");
                return Ok(Self {
                    path,
                    ids: HashSet::new(),
                    writer: None,
                    needs_newline: false,
                    torn_offset: None,
                });
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let unterminated = !raw.is_empty() && !raw.ends_with('\n');
        let mut needs_newline = unterminated;
        let mut torn_offset = None;
        let line_count = raw.lines().count();
        let mut ids = HashSet::new();

        for (index, line) in raw.lines().enumerate() {
            let entry = line.trim();
            if entry.is_empty() {
                continue;
            }
            match space.parse(entry) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(error) if unterminated && index + 1 == line_count => {
                    warn!(
                        line = index + 1,
                        entry,
                        error = %error,
                        "ignoring truncated final entry in dead-identifier record"
                    );
                    let offset = raw.rfind('\n').map_or(0, |pos| pos + 1);
                    torn_offset = Some(offset as u64);
                    needs_newline = false;
                }
                Err(source) => {
                    return Err(StoreError::Corrupt {
                        path,
                        line: index + 1,
                        source,
                    });
                }
            }
        }

        info!(count = ids.len(), "loaded dead-identifier record");

        Ok(Self {
            path,
            ids,
            writer: None,
            needs_newline,
            torn_offset,
        })
    }

    /// Returns true if `id` is known to be dead.
    #[must_use]
    pub fn contains(&self, id: &Identifier) -> bool {
        self.ids.contains(id)
    }

    /// Records `id` as dead, durably.
    ///
    /// Returns `true` if the identifier was newly added and `false` if it was
    /// already present (in which case nothing is written).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the record cannot be opened, written or
    /// synced. The in-memory set is left unchanged in that case.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub fn mark_dead(&mut self, id: &Identifier) -> Result<bool, StoreError> {
        if self.ids.contains(id) {
            return Ok(false);
        }

        let mut line = String::with_capacity(id.as_str().len() + 2);
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(id.as_str());
        line.push('\n');

        let path = self.path.clone();
        let writer = self.writer()?;
        let before = writer
            .metadata()
            .map_err(|e| StoreError::io(path.clone(), e))?
            .len();
        let written = writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.sync_data());
        if let Err(error) = written {
            self.rollback(before);
            return Err(StoreError::io(path, error));
        }

        self.needs_newline = false;
        self.ids.insert(id.clone());
        debug!(total = self.ids.len(), "identifier marked dead");
        Ok(true)
    }

    /// Number of dead identifiers known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no identifiers are known dead.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Cuts a partially written entry so the record ends at `len` again.
    ///
    /// If the cut fails the handle is dropped and the cut is retried when
    /// the record is next opened.
    fn rollback(&mut self, len: u64) {
        let cut = match self.writer.as_ref() {
            Some(file) => file.set_len(len),
            None => return,
        };
        if let Err(error) = cut {
            warn!(
                offset = len,
                error = %error,
                "cannot cut partial entry from dead-identifier record"
            );
            self.writer = None;
            self.torn_offset = Some(len);
        }
    }

    fn writer(&mut self) -> Result<&mut File, StoreError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| StoreError::io(self.path.clone(), e))?;
            if let Some(offset) = self.torn_offset {
                file.set_len(offset)
                    .map_err(|e| StoreError::io(self.path.clone(), e))?;
                self.torn_offset = None;
                debug!(offset, "cut torn entry from dead-identifier record");
            }
            self.writer = Some(file);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| StoreError::io(self.path.clone(), io::ErrorKind::Other.into()))
    }
}
