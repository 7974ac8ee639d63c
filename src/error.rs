//! Error types for the cache core.
//!
//! All core modules return [`CacheResult<T>`]; the binary boundary wraps
//! these in `anyhow` with context where appropriate.

use thiserror::Error;

/// Result type alias for cache core operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// All errors that can occur in the cache core.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No stored entry matches the query. Normal during a read; drives a
    /// re-fetch rather than surfacing to the client.
    #[error("no entry matches the query")]
    NotFound,

    /// The path names a repository index with a compression suffix we
    /// cannot decompress.
    #[error("unsupported index compression")]
    Unsupported,

    /// The path cannot be used as a cache key (empty, absolute, or not in
    /// lexically cleaned form).
    #[error("invalid cache path: {0}")]
    InvalidPath(String),

    /// Upstream transport error or non-200 response.
    #[error("upstream fetch failed with status {0}")]
    FetchFailure(u16),

    /// Downloaded data did not match the expected checksums.
    #[error("checksum validation failed for {0}")]
    Validation(String),

    /// Disk I/O failure inside a storage operation.
    #[error("storage failure: {context}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed control file or checksum line in a repository index.
    #[error("malformed index data: {0}")]
    Parse(String),
}

impl CacheError {
    /// Create a storage error with context.
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// True when the error is the benign cache-miss marker.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_benign() {
        assert!(CacheError::NotFound.is_not_found());
        assert!(!CacheError::Unsupported.is_not_found());
    }

    #[test]
    fn storage_error_display() {
        let err = CacheError::storage(
            "renaming temp file",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("renaming temp file"));
    }
}
