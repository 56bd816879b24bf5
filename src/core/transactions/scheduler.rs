use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::entry::{ExecContext, TransactionEntry, TransactionKind};
use crate::core::error::{SetupError, SetupResult};
use crate::core::http::build_http_client;
use crate::core::progress::{ProgressHandle, ProgressReporter, ProgressState};
use crate::core::state::EngineSettings;

/// Highest percentage reported while entries are still queued. Only the
/// final step of a run may reach 100, which is what marks it complete.
const RUNNING_PERCENT_CEILING: f32 = 99.9;

/// Ordered queue of file transactions executed as one background batch.
///
/// Entries run strictly in submission order on a single worker task. A failing
/// entry is recorded and the batch moves on; nothing is rolled back.
pub struct TransactionScheduler {
    queue: VecDeque<TransactionEntry>,
    progress: ProgressReporter,
    client: Client,
    chunk_size: usize,
    busy: Arc<AtomicBool>,
}

impl TransactionScheduler {
    pub fn new(settings: &EngineSettings) -> SetupResult<Self> {
        let client = build_http_client(settings)?;
        Ok(Self::with_client(client, settings.chunk_size))
    }

    pub fn with_client(client: Client, chunk_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            progress: ProgressReporter::new(),
            client,
            chunk_size: chunk_size.max(1),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    // ── Scheduling ──────────────────────────────────────

    /// Append one entry. Nothing runs until [`begin`](Self::begin); validation
    /// happens at execution time.
    pub fn schedule(
        &mut self,
        kind: TransactionKind,
        source: impl Into<String>,
        destination: Option<PathBuf>,
        optional: bool,
    ) {
        self.push(TransactionEntry::new(kind, source, destination, optional));
    }

    pub fn push(&mut self, entry: TransactionEntry) {
        self.queue.push_back(entry);
    }

    pub fn schedule_copy(
        &mut self,
        source: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
        optional: bool,
    ) {
        let source = source.into();
        self.schedule(
            TransactionKind::Copy,
            source.to_string_lossy(),
            Some(dest.into()),
            optional,
        );
    }

    pub fn schedule_move(
        &mut self,
        source: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
        optional: bool,
    ) {
        let source = source.into();
        self.schedule(
            TransactionKind::Move,
            source.to_string_lossy(),
            Some(dest.into()),
            optional,
        );
    }

    pub fn schedule_delete(&mut self, source: impl Into<PathBuf>, optional: bool) {
        let source = source.into();
        self.schedule(TransactionKind::Delete, source.to_string_lossy(), None, optional);
    }

    pub fn schedule_download(&mut self, url: impl Into<String>, dest: impl Into<PathBuf>) {
        self.schedule(TransactionKind::Download, url, Some(dest.into()), false);
    }

    /// Schedule a download that must match the given SHA-1 hex digest.
    pub fn schedule_verified_download(
        &mut self,
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        sha1: impl Into<String>,
    ) {
        let entry = TransactionEntry::new(TransactionKind::Download, url, Some(dest.into()), false)
            .with_sha1(sha1);
        self.push(entry);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TransactionEntry> {
        self.queue.iter()
    }

    // ── Inspection ──────────────────────────────────────

    /// Sum of the sizes of every queued entry, for an upfront estimate.
    ///
    /// Sizes are memoized on the entries, so the batch reuses them.
    pub async fn total_size(&mut self) -> u64 {
        let mut total = 0u64;
        for entry in self.queue.iter_mut() {
            total += entry.size(&self.client).await;
        }
        total
    }

    /// Failures collected by the most recent run.
    pub fn errors(&self) -> Vec<Arc<SetupError>> {
        self.progress.errors()
    }

    pub fn progress(&self) -> ProgressState {
        self.progress.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    // ── Execution ───────────────────────────────────────

    /// Start executing the queued entries on a background task.
    ///
    /// The queue is handed to the worker; entries scheduled afterwards form
    /// the next batch. Each run reports through its own handle. Fails with [`SetupError::AlreadyRunning`] while a
    /// previous batch of this scheduler is still in flight.
    pub fn begin(&mut self) -> SetupResult<ProgressHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SetupError::Other(format!("No async runtime available: {e}")))?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SetupError::AlreadyRunning);
        }

        // Fresh channel per run: handles from earlier runs keep their final state.
        self.progress = ProgressReporter::new();
        let cancel = CancellationToken::new();
        let handle = ProgressHandle::new(self.progress.subscribe(), cancel.clone());

        let batch = BatchRun {
            id: Uuid::new_v4(),
            entries: std::mem::take(&mut self.queue),
            client: self.client.clone(),
            chunk_size: self.chunk_size,
            cancel,
            progress: self.progress.clone(),
            busy: self.busy.clone(),
        };
        runtime.spawn(batch.run());

        Ok(handle)
    }
}

/// Everything the worker owns for one run.
struct BatchRun {
    id: Uuid,
    entries: VecDeque<TransactionEntry>,
    client: Client,
    chunk_size: usize,
    cancel: CancellationToken,
    progress: ProgressReporter,
    busy: Arc<AtomicBool>,
}

impl BatchRun {
    #[instrument(skip(self), fields(run = %self.id, entries = self.entries.len()))]
    async fn run(self) {
        let BatchRun {
            mut entries,
            client,
            chunk_size,
            cancel,
            progress,
            busy,
            ..
        } = self;
        let _guard = RunGuard {
            busy,
            progress: progress.clone(),
        };

        let mut total = 0u64;
        for entry in entries.iter_mut() {
            total += entry.size(&client).await;
        }
        info!("Starting batch: {} entries, {} bytes", entries.len(), total);

        let ctx = ExecContext {
            client: &client,
            chunk_size,
            cancel: &cancel,
        };
        let mut moved = 0u64;
        let mut failed = 0usize;

        while let Some(entry) = entries.pop_front() {
            if cancel.is_cancelled() {
                failed += 1;
                progress.add_error(entry_failure(&entry, SetupError::Cancelled));
                continue;
            }

            let remaining = entries.len();
            let entry_size = entry.cached_size().unwrap_or(0);
            let base = moved;
            let mut on_bytes = |bytes: u64| {
                let done = base + bytes.min(entry_size);
                progress.set_percent(batch_percent(done, total, true));
            };

            debug!("Executing {} of {}", entry.kind(), entry.source());
            let result = entry.execute(&ctx, &mut on_bytes).await;
            match result {
                Ok(()) => {
                    moved += entry_size;
                    progress.set_percent(batch_percent(moved, total, remaining > 0));
                }
                Err(e) => {
                    warn!("{} of {} failed: {}", entry.kind(), entry.source(), e);
                    failed += 1;
                    progress.add_error(entry_failure(&entry, e));
                }
            }
        }

        progress.set_percent(100.0);
        info!("Batch finished: {} failed", failed);
    }
}

/// Releases the run flag, then publishes `finished`, even if the worker unwinds.
struct RunGuard {
    busy: Arc<AtomicBool>,
    progress: ProgressReporter,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        self.progress.finish();
    }
}

fn entry_failure(entry: &TransactionEntry, error: SetupError) -> SetupError {
    SetupError::Transaction {
        kind: entry.kind(),
        target: entry.source().to_string(),
        source: Box::new(error),
    }
}

/// Byte-weighted percentage. An empty batch counts as done.
fn batch_percent(done: u64, total: u64, entries_left: bool) -> f32 {
    let percent = if total == 0 {
        100.0
    } else {
        (done as f64 / total as f64 * 100.0) as f32
    };
    if entries_left {
        percent.min(RUNNING_PERCENT_CEILING)
    } else {
        percent.min(100.0)
    }
}
