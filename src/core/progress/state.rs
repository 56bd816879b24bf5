use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::core::error::SetupError;

/// Coarse status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Running,
    /// Terminal once reached within a run.
    Complete,
    /// At least one failure was recorded. Overwritten by `Complete`.
    Error,
}

/// Snapshot of a batch or download run.
///
/// `percent` and `errors` are independent facts: a run may reach 100% and
/// `Complete` while still carrying failures.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressState {
    pub status: ProgressStatus,
    pub percent: f32,
    pub errors: Vec<Arc<SetupError>>,
    /// Set once the worker has exited, successfully or not.
    pub finished: bool,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            status: ProgressStatus::Running,
            percent: 0.0,
            errors: Vec::new(),
            finished: false,
        }
    }
}

impl ProgressState {
    pub fn reset(&mut self) {
        self.errors.clear();
        self.percent = 0.0;
        self.status = ProgressStatus::Running;
        self.finished = false;
    }

    /// Raise the percentage. Values are clamped to `0..=100` and never lower
    /// the current value; reaching 100 forces `Complete`.
    pub fn set_percent(&mut self, percent: f32) {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        if percent > self.percent {
            self.percent = percent;
        }
        if self.percent >= 100.0 {
            self.status = ProgressStatus::Complete;
        }
    }

    pub fn add_error(&mut self, error: Arc<SetupError>) {
        self.errors.push(error);
        if self.status != ProgressStatus::Complete {
            self.status = ProgressStatus::Error;
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.status == ProgressStatus::Complete
    }
}

/// Producer side of a [`ProgressState`].
///
/// Every mutation goes through the watch channel, so readers always observe
/// whole updates and are woken when something changes.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<ProgressState>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressState> {
        self.tx.subscribe()
    }

    pub fn set_percent(&self, percent: f32) {
        self.tx.send_modify(|state| state.set_percent(percent));
    }

    pub fn add_error(&self, error: impl Into<Arc<SetupError>>) {
        let error = error.into();
        self.tx.send_modify(|state| state.add_error(error));
    }

    pub fn finish(&self) {
        self.tx.send_modify(|state| state.finished = true);
    }

    pub fn snapshot(&self) -> ProgressState {
        self.tx.borrow().clone()
    }

    pub fn errors(&self) -> Vec<Arc<SetupError>> {
        self.tx.borrow().errors.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.tx.borrow().finished
    }
}
