//! Failure classes that callers branch on.
//!
//! Most functions return `anyhow::Result`; these variants are attached where
//! the caller needs to distinguish a transient capability outage from a bad
//! document or a configuration problem. They survive `anyhow` wrapping and
//! can be recovered with `Error::downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocgraphError {
    /// An external capability (embedding or reasoning endpoint) failed after
    /// retries were exhausted.
    #[error("capability error: {0}")]
    Capability(String),

    /// A single document could not be processed; batch ingestion records
    /// this and continues with the next file.
    #[error("document error: {0}")]
    Document(String),

    /// Concurrent writers raced on the same content; the losing writer
    /// surfaces this instead of silently duplicating the document.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The stored corpus and the running configuration disagree, for example
    /// on embedding dimensions.
    #[error("configuration error: {0}")]
    Config(String),
}
