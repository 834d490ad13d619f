//! Stage abstraction and error taxonomy for the harvest pipeline.
//!
//! Failures are grouped by how far they may travel:
//! - [`DiscoveryError`] never leaves the directory; it selects the fallback list
//! - [`TransportError`](crate::traits::TransportError) ends one source's fetch
//! - [`RejectReason`] drops one record
//! - [`StoreError`] rolls back one source's batch

use thiserror::Error;

use crate::traits::TransportError;

// ============================================================================
// Pipeline Trait
// ============================================================================

/// Generic pipeline stage that transforms Input → Output.
///
/// Implementations must be deterministic: the same input always produces the
/// same output, which keeps repeated harvest runs idempotent.
pub trait HarvestStage: Send + Sync {
    /// Input type consumed by this stage
    type Input;

    /// Output type produced by this stage
    type Output;

    /// Error type for stage failures
    type Error: std::error::Error + Send + Sync + 'static;

    /// Executes the stage on a single input.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the input cannot be turned into an output. The error
    /// should carry enough context to explain the rejection in logs.
    fn execute(&self, input: Self::Input) -> Result<Self::Output, Self::Error>;

    /// Returns a human-readable name for this stage.
    fn stage_name(&self) -> &'static str;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while scraping the directory page.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Directory page could not be fetched
    #[error("Directory page unavailable: {0}")]
    Transport(#[from] TransportError),

    /// Link selector failed to compile
    #[error("Invalid directory selector: {0}")]
    InvalidSelector(String),

    /// Page parsed but contained no usable source links
    #[error("No source links found on directory page")]
    NoLinks,
}

/// Why a raw record was dropped by the normalizer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Record has no establishment identifier
    #[error("missing establishment id")]
    MissingId,

    /// Record has no score
    #[error("missing score")]
    MissingScore,

    /// Provider encodes "not scored" as zero
    #[error("zero score")]
    ZeroScore,

    /// Record has no inspection date
    #[error("missing inspection date")]
    MissingDate,

    /// Inspection date is not a calendar date
    #[error("invalid inspection date: {0}")]
    InvalidDate(String),

    /// Record is not an object of the expected shape
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Errors raised by the novelty store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection string or pool setup failed
    #[error("Failed to connect to store: {0}")]
    Connect(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Query or transaction failure
    #[error("Store query failed: {0}")]
    Sqlx(#[from] sqlx::Error),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_error_wraps_transport() {
        let err: DiscoveryError = TransportError::Status(503).into();
        assert_eq!(
            err.to_string(),
            "Directory page unavailable: Unexpected HTTP status 503"
        );
    }

    #[test]
    fn reject_reason_messages() {
        assert_eq!(RejectReason::ZeroScore.to_string(), "zero score");
        assert_eq!(
            RejectReason::InvalidDate("yesterday".into()).to_string(),
            "invalid inspection date: yesterday"
        );
    }
}
