use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{Result, SurfaceError};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Attempt budget and backoff for a single surface operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Linear backoff base: attempt n sleeps n * backoff before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

// ---------------------------------------------------------------------------
// with_retry
// ---------------------------------------------------------------------------

/// Run one surface operation under a bounded retry budget.
///
/// Only transient errors ([`SurfaceError::is_transient`]) consume
/// attempts; fatal errors (unreachable surface, plain I/O) return on the
/// first occurrence so the caller's recovery path sees them promptly.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err: Option<SurfaceError> = None;

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                if attempt < policy.max_attempts {
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "transient surface error, retrying"
                    );
                    tokio::time::sleep(policy.backoff * attempt).await;
                } else {
                    error!(
                        op = op_name,
                        attempts = policy.max_attempts,
                        error = %e,
                        "all retry attempts exhausted"
                    );
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    // max_attempts >= 1, so a transient error was recorded on every path here.
    Err(last_err.unwrap_or_else(|| SurfaceError::Timeout(format!("{op_name}: no attempts made"))))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
