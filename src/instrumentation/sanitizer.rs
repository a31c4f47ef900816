//! Path sanitization
//!
//! Rewrites variable path segments (UUIDs, numeric ids, anything the
//! configured pattern matches) to a fixed placeholder so that metric
//! identities stay low-cardinality.

use std::borrow::Cow;

use regex::Regex;

use crate::config::InstrumentationConfig;
use crate::error::ConfigError;

/// Replacement for every matched segment.
pub const ID_PLACEHOLDER: &str = "_id_";

/// Compiled once per layer; cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    pattern: Option<Regex>,
}

impl PathSanitizer {
    /// Compile `pattern`. Returns an error for a malformed pattern even when
    /// `enabled` is false, so a bad config never sits unnoticed.
    pub fn new(pattern: &str, enabled: bool) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            pattern: enabled.then_some(regex),
        })
    }

    pub fn from_config(config: &InstrumentationConfig) -> Result<Self, ConfigError> {
        Self::new(&config.remove_ids_regex, config.remove_ids)
    }

    /// Identity sanitizer.
    pub fn disabled() -> Self {
        Self { pattern: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.pattern.is_some()
    }

    /// Replace every match of the pattern with [`ID_PLACEHOLDER`].
    pub fn sanitize<'a>(&self, path: &'a str) -> Cow<'a, str> {
        match &self.pattern {
            Some(regex) => regex.replace_all(path, ID_PLACEHOLDER),
            None => Cow::Borrowed(path),
        }
    }
}
