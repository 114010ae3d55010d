//! Shared async helpers.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Run `fut` until it finishes, `duration` elapses, or `cancel` fires.
pub async fn cancellable_with_timeout<F, T>(
    duration: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = timeout(duration, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout(duration)),
        },
    }
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
