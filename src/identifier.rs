//! Identifier shape and odometer-ordered enumeration.
//!
//! An identifier is a fixed-length prefix of lowercase letters followed by a
//! fixed-length suffix of digits (`aa0000`, `aa0001`, ...). The generator
//! walks the whole space with the prefix varying slowest and the rightmost
//! digit varying fastest, so ordinal `n` always maps to the same identifier
//! and a run can resume from any position.
//!
//! # Example
//!
//! ```
//! use shotscan_core::identifier::IdentifierSpace;
//!
//! let space = IdentifierSpace::new(2, 4).unwrap();
//! let first: Vec<String> = space.iter().take(3).map(|id| id.to_string()).collect();
//! assert_eq!(first, ["aa0000", "aa0001", "aa0002"]);
//! ```

use std::fmt;

use thiserror::Error;

/// Lowercase prefix alphabet.
const LETTERS: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Digit suffix alphabet.
const DIGITS: &[u8; 10] = b"0123456789";

/// Default number of prefix letters.
pub const DEFAULT_PREFIX_LEN: u32 = 2;

/// Default number of suffix digits.
pub const DEFAULT_SUFFIX_LEN: u32 = 4;

/// Errors from constructing an identifier space or parsing an identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// Prefix and suffix are both zero length.
    #[error("identifier shape must have at least one character (prefix {prefix_len}, suffix {suffix_len})")]
    EmptyShape {
        /// Requested prefix length.
        prefix_len: u32,
        /// Requested suffix length.
        suffix_len: u32,
    },

    /// The number of combinations does not fit in a `u64`.
    #[error("identifier space 26^{prefix_len} x 10^{suffix_len} is too large")]
    SpaceTooLarge {
        /// Requested prefix length.
        prefix_len: u32,
        /// Requested suffix length.
        suffix_len: u32,
    },

    /// A string does not match the configured shape.
    #[error("'{value}' is not a valid identifier: expected {prefix_len} lowercase letters then {suffix_len} digits")]
    Malformed {
        /// The rejected input.
        value: String,
        /// Expected prefix length.
        prefix_len: u32,
        /// Expected suffix length.
        suffix_len: u32,
    },
}

/// A single candidate identifier.
///
/// Only [`IdentifierSpace`] creates these, so every value is known to match
/// the shape of the space it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Shape of the identifier space: `prefix_len` letters then `suffix_len` digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierSpace {
    prefix_len: u32,
    suffix_len: u32,
    /// 10^suffix_len, cached for index arithmetic.
    suffix_span: u64,
    /// Total number of identifiers.
    size: u64,
}

impl Default for IdentifierSpace {
    fn default() -> Self {
        // 26^2 * 10^4 always fits.
        Self {
            prefix_len: DEFAULT_PREFIX_LEN,
            suffix_len: DEFAULT_SUFFIX_LEN,
            suffix_span: 10_000,
            size: 6_760_000,
        }
    }
}

impl IdentifierSpace {
    /// Creates a space with the given segment lengths.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::EmptyShape`] when both lengths are zero and
    /// [`IdentifierError::SpaceTooLarge`] when 26^P x 10^S overflows `u64`.
    pub fn new(prefix_len: u32, suffix_len: u32) -> Result<Self, IdentifierError> {
        if prefix_len == 0 && suffix_len == 0 {
            return Err(IdentifierError::EmptyShape {
                prefix_len,
                suffix_len,
            });
        }
        let too_large = || IdentifierError::SpaceTooLarge {
            prefix_len,
            suffix_len,
        };
        let prefix_span = 26u64.checked_pow(prefix_len).ok_or_else(too_large)?;
        let suffix_span = 10u64.checked_pow(suffix_len).ok_or_else(too_large)?;
        let size = prefix_span.checked_mul(suffix_span).ok_or_else(too_large)?;

        Ok(Self {
            prefix_len,
            suffix_len,
            suffix_span,
            size,
        })
    }

    /// Total number of identifiers in the space.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Total identifier length in characters.
    #[must_use]
    pub fn identifier_len(&self) -> usize {
        (self.prefix_len + self.suffix_len) as usize
    }

    /// Returns the identifier at `index`, or `None` past the end of the space.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn identifier_at(&self, index: u64) -> Option<Identifier> {
        if index >= self.size {
            return None;
        }

        let mut buf = vec![0u8; self.identifier_len()];
        let prefix_len = self.prefix_len as usize;

        let mut suffix = index % self.suffix_span;
        for slot in buf[prefix_len..].iter_mut().rev() {
            *slot = DIGITS[(suffix % 10) as usize];
            suffix /= 10;
        }

        let mut prefix = index / self.suffix_span;
        for slot in buf[..prefix_len].iter_mut().rev() {
            *slot = LETTERS[(prefix % 26) as usize];
            prefix /= 26;
        }

        // Both alphabets are ASCII.
        Some(Identifier(buf.into_iter().map(char::from).collect()))
    }

    /// Returns the ordinal of `id` within this space.
    ///
    /// `id` must have been produced or parsed by this space.
    #[must_use]
    pub fn index_of(&self, id: &Identifier) -> u64 {
        let bytes = id.as_str().as_bytes();
        let prefix_len = self.prefix_len as usize;

        let prefix = bytes[..prefix_len]
            .iter()
            .fold(0u64, |acc, b| acc * 26 + u64::from(b - b'a'));
        let suffix = bytes[prefix_len..]
            .iter()
            .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'));

        prefix * self.suffix_span + suffix
    }

    /// Validates `value` against the shape and wraps it as an [`Identifier`].
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Malformed`] when the length or any
    /// character class does not match.
    pub fn parse(&self, value: &str) -> Result<Identifier, IdentifierError> {
        let bytes = value.as_bytes();
        let prefix_len = self.prefix_len as usize;
        let valid = bytes.len() == self.identifier_len()
            && bytes[..prefix_len].iter().all(u8::is_ascii_lowercase)
            && bytes[prefix_len..].iter().all(u8::is_ascii_digit);

        if valid {
            Ok(Identifier(value.to_string()))
        } else {
            Err(IdentifierError::Malformed {
                value: value.to_string(),
                prefix_len: self.prefix_len,
                suffix_len: self.suffix_len,
            })
        }
    }

    /// Iterates the whole space from the first identifier.
    #[must_use]
    pub fn iter(&self) -> IdentifierGenerator {
        IdentifierGenerator::starting_at(*self, 0)
    }
}

/// Lazy odometer-ordered iterator over an [`IdentifierSpace`].
///
/// The generator does not know how many items the caller wants; bound it
/// with [`Iterator::take`].
#[derive(Debug, Clone)]
pub struct IdentifierGenerator {
    space: IdentifierSpace,
    next: u64,
}

impl IdentifierGenerator {
    /// Creates a generator that yields from ordinal `index` onwards.
    ///
    /// An index past the end yields nothing.
    #[must_use]
    pub fn starting_at(space: IdentifierSpace, index: u64) -> Self {
        Self {
            space,
            next: index.min(space.size),
        }
    }

    /// Ordinal of the next identifier to be yielded.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.next
    }
}

impl Iterator for IdentifierGenerator {
    type Item = Identifier;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.space.identifier_at(self.next)?;
        self.next += 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.space.size - self.next;
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        let skip = u64::try_from(n).unwrap_or(u64::MAX);
        self.next = self.next.saturating_add(skip).min(self.space.size);
        self.next()
    }
}

impl std::iter::FusedIterator for IdentifierGenerator {}
