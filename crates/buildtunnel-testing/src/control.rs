//! A control plane that follows a script.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use buildtunnel_core::{ConnectionDescriptor, LeaseRequest};
use buildtunnel_lease::{ConnectionResponse, ControlPlane, LeaseError};

#[derive(Debug, Clone)]
enum Step {
    Pending(Duration),
    Active(ConnectionDescriptor),
    Fail(String),
}

#[derive(Debug, Default)]
struct Inner {
    steps: Mutex<Vec<Step>>,
    calls: AtomicUsize,
    health_failures: AtomicUsize,
    health_attempts: AtomicUsize,
    health_reports: AtomicUsize,
}

/// A [`ControlPlane`] that answers connection requests from a script.
///
/// Each `get_connection` call consumes the next step; the last step repeats
/// forever. An empty script answers "pending, retry in one second".
/// Clones share the script and the counters.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use buildtunnel_testing::{ScriptedControlPlane, fixtures};
///
/// let addr = "127.0.0.1:9".parse().unwrap();
/// let plane = ScriptedControlPlane::new()
///     .then_pending(Duration::from_secs(2))
///     .then_active(fixtures::descriptor(addr));
/// assert_eq!(plane.get_connection_calls(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedControlPlane {
    inner: Arc<Inner>,
}

impl ScriptedControlPlane {
    /// Create an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, step: Step) -> Self {
        self.inner
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(step);
        self
    }

    /// Answer "pending, retry after `wait`".
    #[must_use]
    pub fn then_pending(self, wait: Duration) -> Self {
        self.push(Step::Pending(wait))
    }

    /// Answer with an active machine.
    #[must_use]
    pub fn then_active(self, descriptor: ConnectionDescriptor) -> Self {
        self.push(Step::Active(descriptor))
    }

    /// Fail with a protocol error carrying `message`.
    #[must_use]
    pub fn then_fail(self, message: &str) -> Self {
        self.push(Step::Fail(message.to_string()))
    }

    /// Fail the next `count` health reports.
    #[must_use]
    pub fn fail_health(self, count: usize) -> Self {
        self.inner.health_failures.store(count, Ordering::SeqCst);
        self
    }

    /// How many times a connection was requested.
    #[must_use]
    pub fn get_connection_calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// How many health reports succeeded.
    #[must_use]
    pub fn health_reports(&self) -> usize {
        self.inner.health_reports.load(Ordering::SeqCst)
    }

    /// How many health reports were attempted, failed ones included.
    #[must_use]
    pub fn health_attempts(&self) -> usize {
        self.inner.health_attempts.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let call = self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let steps = self
            .inner
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        steps
            .get(call)
            .or_else(|| steps.last())
            .cloned()
            .unwrap_or(Step::Pending(Duration::from_secs(1)))
    }
}

impl ControlPlane for ScriptedControlPlane {
    async fn get_connection(
        &self,
        _request: &LeaseRequest,
    ) -> Result<ConnectionResponse, LeaseError> {
        match self.next_step() {
            Step::Pending(wait) => Ok(ConnectionResponse::Pending { wait }),
            Step::Active(descriptor) => Ok(ConnectionResponse::Active(descriptor)),
            Step::Fail(message) => Err(LeaseError::protocol(message)),
        }
    }

    async fn report_health(&self, _request: &LeaseRequest) -> Result<(), LeaseError> {
        self.inner.health_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .inner
            .health_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LeaseError::protocol("scripted health failure"));
        }
        self.inner.health_reports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_last_step_repeats() {
        let plane = ScriptedControlPlane::new()
            .then_pending(Duration::from_millis(10))
            .then_fail("boom");
        let request = fixtures::lease_request();

        assert!(matches!(
            plane.get_connection(&request).await,
            Ok(ConnectionResponse::Pending { .. })
        ));
        for _ in 0..2 {
            assert!(plane.get_connection(&request).await.is_err());
        }
        assert_eq!(plane.get_connection_calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_script_is_pending() {
        let plane = ScriptedControlPlane::new();
        let response = plane
            .get_connection(&fixtures::lease_request())
            .await
            .unwrap();
        assert_eq!(
            response,
            ConnectionResponse::Pending {
                wait: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn test_health_failures_are_counted() {
        let plane = ScriptedControlPlane::new().fail_health(1);
        let request = fixtures::lease_request();

        assert!(plane.report_health(&request).await.is_err());
        assert!(plane.report_health(&request).await.is_ok());
        assert_eq!(plane.health_attempts(), 2);
        assert_eq!(plane.health_reports(), 1);
    }
}
