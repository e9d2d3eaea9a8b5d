//! Timeout-guarded waiting helpers for tests.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

/// Default timeout for test waits.
///
/// Chosen empirically: most waiting should not take more than a few seconds,
/// and hanging forever hides the actual failure.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Polls `condition` until it returns true.
///
/// # Panics
///
/// Panics when the condition does not hold within [`DEFAULT_WAIT_TIMEOUT`],
/// so tests fail fast with a clear message instead of hanging.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let outcome = timeout(DEFAULT_WAIT_TIMEOUT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    if outcome.is_err() {
        panic!(
            "condition did not hold within {DEFAULT_WAIT_TIMEOUT:?}; \
             the expected state was likely never reached"
        );
    }
}

/// Awaits a future, panicking when it takes longer than
/// [`DEFAULT_WAIT_TIMEOUT`].
pub async fn within_deadline<F: Future>(future: F) -> F::Output {
    match timeout(DEFAULT_WAIT_TIMEOUT, future).await {
        Ok(output) => output,
        Err(_) => panic!("future did not complete within {DEFAULT_WAIT_TIMEOUT:?}"),
    }
}
