use thiserror::Error;

/// Conditions that abort an import. Everything else degrades to an
/// [`ImportIssue`](crate::import::ImportIssue).
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("asset.version is missing or not a number: {0:?}")]
    InvalidVersion(String),

    #[error("unsupported glTF version {0}, 2.0 or later is required")]
    UnsupportedVersion(String),

    #[error("node slot {slot} exceeds destination capacity {capacity}")]
    NodeCapacity { slot: usize, capacity: usize },

    #[error("source document is unreadable: {0}")]
    Source(String),
}

/// Failure of a single index lookup in the source document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("{kind} index {index} is out of range (count {count})")]
    OutOfRange {
        kind: &'static str,
        index: usize,
        count: usize,
    },

    #[error("{kind} reference is not a non-negative integer")]
    NotAnIndex { kind: &'static str },

    #[error("accessor {index} has type {actual}, expected {expected}")]
    AccessorType {
        index: usize,
        expected: &'static str,
        actual: String,
    },
}
