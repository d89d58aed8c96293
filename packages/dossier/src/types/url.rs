//! Normalized URL newtype shared by sources and pages.
//!
//! All URLs entering the pipeline pass through [`NormalizedUrl`]:
//! HTTPS-only, trailing slash stripped, structurally valid. Discovered
//! link lists use [`NormalizedUrl::try_new`] so invalid links are
//! skipped rather than failing the whole batch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A validated, normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    /// Validate and normalize a URL string.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, PipelineError> {
        let raw = raw.as_ref();

        if raw.is_empty() {
            return Err(Self::invalid(raw, "URL cannot be empty"));
        }
        if !raw.starts_with("https://") {
            return Err(Self::invalid(raw, "only HTTPS URLs are allowed"));
        }

        let normalized = raw.trim_end_matches('/');
        if normalized.matches("://").count() != 1 {
            return Err(Self::invalid(raw, "invalid URL format"));
        }

        let parsed = url::Url::parse(normalized)
            .map_err(|e| Self::invalid(raw, &e.to_string()))?;
        if parsed.host_str().is_none() {
            return Err(Self::invalid(raw, "URL has no host"));
        }

        Ok(Self(normalized.to_string()))
    }

    /// Normalize a URL, returning `None` instead of an error.
    ///
    /// Used when filtering discovered-link lists, where an invalid
    /// link is dropped rather than failing the job.
    pub fn try_new(raw: impl AsRef<str>) -> Option<Self> {
        Self::new(raw).ok()
    }

    /// Resolve a (possibly relative) path against this URL.
    pub fn join(&self, path: &str) -> Option<Self> {
        let base = url::Url::parse(&self.0).ok()?;
        let resolved = base.join(path).ok()?;
        Self::try_new(resolved.as_str())
    }

    /// Normalize a list of raw URL strings, skipping invalid ones.
    pub fn from_string_list<I, S>(raw: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter().filter_map(Self::try_new).collect()
    }

    /// The URL as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host component of the URL.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.0)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Whether this URL points at a downloadable file rather than a page.
    pub fn is_file(&self) -> bool {
        let path = self.0.to_lowercase();
        [".pdf", ".doc", ".docx", ".xls", ".xlsx", ".csv", ".zip"]
            .iter()
            .any(|ext| path.ends_with(ext))
    }

    fn invalid(url: &str, reason: &str) -> PipelineError {
        PipelineError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for NormalizedUrl {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NormalizedUrl {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NormalizedUrl> for String {
    fn from(url: NormalizedUrl) -> Self {
        url.0
    }
}
