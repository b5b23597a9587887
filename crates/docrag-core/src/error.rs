//! Error taxonomy shared by every gateway and pipeline stage.
//!
//! Gateways return [`RagError`] rather than an opaque error so that
//! callers can tell a transient outage ([`RagError::StoreUnavailable`])
//! from a failed write ([`RagError::IndexWrite`]) and apply the right
//! isolation policy.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// Unreadable, corrupt or unsupported input file. The file is skipped
    /// and the failure reported to the caller.
    #[error("extraction failed for '{filename}': {message}")]
    Extraction { filename: String, message: String },

    /// Bad static configuration (e.g. chunk overlap >= size). Fatal at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Bad caller-supplied argument (e.g. `k <= 0`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection failure or timeout against a backing store, after the
    /// retry budget was spent.
    #[error("{service} unavailable: {message}")]
    StoreUnavailable { service: String, message: String },

    /// Embedding or vector-index write failure.
    #[error("index write failed for '{index}': {message}")]
    IndexWrite { index: String, message: String },

    /// A record with the same `doc_name` already exists. Treated as a skip.
    #[error("document '{0}' already exists")]
    DuplicateDocument(String),

    /// The remote LLM call failed or produced an unusable stream.
    #[error("upstream LLM error: {0}")]
    UpstreamLlm(String),

    /// Non-transient backend failure (malformed response, query error).
    #[error("{service} error: {message}")]
    Backend { service: String, message: String },
}

impl RagError {
    pub fn extraction(filename: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::Extraction {
            filename: filename.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::StoreUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn index_write(index: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::IndexWrite {
            index: index.into(),
            message: message.into(),
        }
    }

    pub fn backend(service: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::Backend {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, RagError::StoreUnavailable { .. })
    }

    /// Short machine-readable code, used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Extraction { .. } => "extraction_error",
            RagError::InvalidConfiguration(_) => "invalid_configuration",
            RagError::InvalidArgument(_) => "bad_request",
            RagError::StoreUnavailable { .. } => "store_unavailable",
            RagError::IndexWrite { .. } => "index_write_error",
            RagError::DuplicateDocument(_) => "duplicate_document",
            RagError::UpstreamLlm(_) => "upstream_llm_error",
            RagError::Backend { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailability_is_retriable() {
        assert!(RagError::unavailable("opensearch", "timed out").is_retriable());
        assert!(!RagError::index_write("user_a", "bulk rejected").is_retriable());
        assert!(!RagError::InvalidArgument("k".into()).is_retriable());
    }

    #[test]
    fn display_includes_context() {
        let err = RagError::extraction("scan.pdf", "no text layer");
        assert_eq!(
            err.to_string(),
            "extraction failed for 'scan.pdf': no text layer"
        );
        assert_eq!(err.code(), "extraction_error");
    }
}
