use thiserror::Error;

/// Fatal scan failures. Every variant aborts the current scan; the caller is
/// expected to release all claimed hit counts before propagating it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Resource exhausted: {what} (limit {limit})")]
    ResourceExhausted { what: &'static str, limit: usize },
}

impl ScanError {
    pub(crate) fn exhausted(what: &'static str, limit: usize) -> Self {
        ScanError::ResourceExhausted { what, limit }
    }
}
