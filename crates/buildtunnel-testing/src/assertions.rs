//! Assertion helpers for forwarded calls.

use std::fmt::Debug;
use std::time::Duration;

use tonic::{Code, Status};

/// Assert that `result` failed with `code`, returning the status.
///
/// # Panics
///
/// Panics if `result` succeeded or failed with another code.
#[track_caller]
pub fn assert_code<T: Debug>(result: Result<T, Status>, code: Code) -> Status {
    match result {
        Ok(value) => panic!("expected {code:?}, got success: {value:?}"),
        Err(status) => {
            assert_eq!(
                status.code(),
                code,
                "expected {code:?}, got {:?}: {}",
                status.code(),
                status.message()
            );
            status
        }
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` passes.
///
/// Returns whether the condition held.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
