// ---------------------------------------------------------------------------
// SurfaceError
// ---------------------------------------------------------------------------

/// Errors produced by surface and channel operations.
///
/// The variants split into two classes:
/// - transient (`NotReady`, `StaleRead`, `Timeout`) — worth retrying
///   locally via [`crate::retry::with_retry`];
/// - fatal (`Unreachable`, `Io`) — never retried here. `Unreachable`
///   additionally signals that the whole surface set must go through
///   teardown/recreate recovery.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    /// The surface exists but an element of it is not ready yet.
    #[error("surface not ready: {0}")]
    NotReady(String),

    /// A read raced a re-render and returned inconsistent content.
    #[error("stale read: {0}")]
    StaleRead(String),

    /// A single read or submit exceeded its per-operation deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The surface (or its host session) is gone; recovery required.
    #[error("surface unreachable: {0}")]
    Unreachable(String),

    /// Underlying I/O failure that is not retryable.
    #[error("io: {0}")]
    Io(String),
}

impl SurfaceError {
    /// Whether a bounded local retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SurfaceError::NotReady(_) | SurfaceError::StaleRead(_) | SurfaceError::Timeout(_)
        )
    }

    /// Whether this error must trigger full surface recovery.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SurfaceError::Unreachable(_))
    }
}

pub type Result<T> = std::result::Result<T, SurfaceError>;
