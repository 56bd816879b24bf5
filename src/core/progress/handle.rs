use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::state::{ProgressState, ProgressStatus};
use crate::core::error::{SetupError, SetupResult};

/// Caller-facing view of a running batch or download.
///
/// Cheap to clone; every clone observes the same run.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    rx: watch::Receiver<ProgressState>,
    cancel: CancellationToken,
}

impl ProgressHandle {
    pub(crate) fn new(rx: watch::Receiver<ProgressState>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Non-blocking check; true once the run has reached `Complete`.
    pub fn is_complete(&self) -> bool {
        self.rx.borrow().status == ProgressStatus::Complete
    }

    /// True once the worker has exited, including a standalone download that failed.
    pub fn is_finished(&self) -> bool {
        self.rx.borrow().finished
    }

    pub fn status(&self) -> ProgressStatus {
        self.rx.borrow().status
    }

    pub fn percent(&self) -> f32 {
        self.rx.borrow().percent
    }

    pub fn has_errors(&self) -> bool {
        self.rx.borrow().has_errors()
    }

    pub fn errors(&self) -> Vec<Arc<SetupError>> {
        self.rx.borrow().errors.clone()
    }

    pub fn snapshot(&self) -> ProgressState {
        self.rx.borrow().clone()
    }

    /// Wait for the next update. Returns `false` once no more updates can arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Resolve once the worker has finished, yielding the final state.
    pub async fn wait(&self) -> SetupResult<ProgressState> {
        let mut rx = self.rx.clone();
        let state = rx
            .wait_for(|state| state.finished)
            .await
            .map_err(|_| SetupError::WorkerLost)?;
        Ok(state.clone())
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> SetupResult<ProgressState> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| SetupError::Timeout)?
    }

    /// Ask the worker to stop. Entries that have not started are skipped and
    /// recorded as cancelled; the run still finishes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::ProgressReporter;

    fn handle_for(reporter: &ProgressReporter) -> ProgressHandle {
        ProgressHandle::new(reporter.subscribe(), CancellationToken::new())
    }

    #[tokio::test]
    async fn wait_resolves_after_finish() {
        let reporter = ProgressReporter::new();
        let handle = handle_for(&reporter);
        assert!(!handle.is_complete());

        let producer = reporter.clone();
        tokio::spawn(async move {
            producer.set_percent(50.0);
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.set_percent(100.0);
            producer.finish();
        });

        let state = handle.wait().await.unwrap();
        assert!(state.is_complete());
        assert_eq!(state.percent, 100.0);
        assert!(handle.is_complete());
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_finished() {
        let reporter = ProgressReporter::new();
        reporter.set_percent(100.0);
        reporter.finish();
        let handle = handle_for(&reporter);
        let state = handle.wait_timeout(Duration::from_millis(50)).await.unwrap();
        assert!(state.finished);
    }

    #[tokio::test]
    async fn wait_reports_lost_worker() {
        let reporter = ProgressReporter::new();
        let handle = handle_for(&reporter);
        drop(reporter);
        assert!(matches!(handle.wait().await, Err(SetupError::WorkerLost)));
    }

    #[tokio::test]
    async fn wait_timeout_expires_while_running() {
        let reporter = ProgressReporter::new();
        let handle = handle_for(&reporter);
        let result = handle.wait_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(SetupError::Timeout)));
        drop(reporter);
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let reporter = ProgressReporter::new();
        let handle = handle_for(&reporter);
        let other = handle.clone();
        handle.cancel();
        assert!(other.is_cancelled());
    }
}
