pub mod paths;
pub mod process;
pub mod progress;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Returned when the root cancellation token fires mid-operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Fail fast if the token was already cancelled.
pub fn ensure_active(token: &CancellationToken) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        return Err(Cancelled);
    }
    Ok(())
}

/// Returns true when the error chain contains a cancellation.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<Cancelled>().is_some())
}
