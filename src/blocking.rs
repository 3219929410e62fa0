//! Run synchronous capability calls (embedding, index, generation) on the
//! blocking thread pool so they never stall the async runtime.
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BlockingError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("blocking task panicked")]
    Panicked,
}

/// Run `f` on the blocking pool and wait for it.
pub async fn run_blocking<F, T>(f: F) -> Result<T, BlockingError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| BlockingError::Panicked)
}

/// Run `f` on the blocking pool, giving up after `limit`.
///
/// The worker thread is detached on timeout and its result discarded.
pub async fn run_with_timeout<F, T>(limit: Duration, f: F) -> Result<T, BlockingError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    with_timeout(limit, run_blocking(f)).await
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, BlockingError>>,
) -> Result<T, BlockingError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BlockingError::TimedOut(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let v = run_blocking(|| 40 + 2).await.unwrap();
        assert_eq!(v, 42);
    }

    #[tokio::test]
    async fn test_run_with_timeout_expires() {
        let result = run_with_timeout(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            1
        })
        .await;
        assert_eq!(result, Err(BlockingError::TimedOut(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let result: Result<(), _> = run_blocking(|| panic!("boom")).await;
        assert_eq!(result, Err(BlockingError::Panicked));
    }
}
