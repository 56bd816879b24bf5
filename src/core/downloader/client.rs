use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::{SetupError, SetupResult};
use crate::core::http::build_http_client;
use crate::core::progress::{ProgressHandle, ProgressReporter};
use crate::core::state::EngineSettings;

/// Knobs for a single streamed transfer.
pub(crate) struct TransferOptions<'a> {
    pub chunk_size: usize,
    pub expected_sha1: Option<&'a str>,
    pub cancel: &'a CancellationToken,
}

/// Streams one HTTP body to disk and reports byte-based progress.
#[derive(Debug, Clone)]
pub struct StreamingDownloader {
    client: Client,
    chunk_size: usize,
    progress: ProgressReporter,
    busy: Arc<AtomicBool>,
}

impl StreamingDownloader {
    pub fn new(settings: &EngineSettings) -> SetupResult<Self> {
        let client = build_http_client(settings)?;
        Ok(Self::with_client(client, settings.chunk_size))
    }

    pub fn with_client(client: Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
            progress: ProgressReporter::new(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle onto the most recent download's progress, without starting anything.
    pub fn progress(&self) -> ProgressHandle {
        ProgressHandle::new(self.progress.subscribe(), CancellationToken::new())
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    // ── Blocking download ───────────────────────────────

    /// Download `url` to `dest`, resolving once the body is fully written.
    ///
    /// Returns the number of bytes written. Fails with
    /// [`SetupError::AlreadyRunning`] while another download of this instance
    /// is in flight.
    pub async fn download(&mut self, url: &str, dest: &Path) -> SetupResult<u64> {
        let guard = self.start_run()?;
        let cancel = CancellationToken::new();
        let result = self.run(url, dest, &cancel).await;
        if let Err(e) = &result {
            warn!("Download of {} failed: {}", url, e);
            guard.progress.add_error(SetupError::Other(e.to_string()));
        }
        result
    }

    // ── Background download ─────────────────────────────

    /// Start the download on a background task and return immediately.
    ///
    /// A failure is recorded on the handle's error list and the handle still
    /// finishes, without reaching `Complete`.
    pub fn download_async(&mut self, url: &str, dest: &Path) -> SetupResult<ProgressHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SetupError::Other(format!("No async runtime available: {e}")))?;

        let guard = self.start_run()?;
        let cancel = CancellationToken::new();
        let handle = ProgressHandle::new(self.progress.subscribe(), cancel.clone());

        let this = self.clone();
        let url = url.to_string();
        let dest = dest.to_path_buf();
        runtime.spawn(async move {
            let _guard = guard;
            match this.run(&url, &dest, &cancel).await {
                Ok(bytes) => info!("Downloaded {} bytes: {} -> {:?}", bytes, url, dest),
                Err(e) => {
                    warn!("Download of {} failed: {}", url, e);
                    this.progress.add_error(e);
                }
            }
        });

        Ok(handle)
    }

    /// Claim the run flag and open a fresh progress channel for the new run.
    fn start_run(&mut self) -> SetupResult<FinishGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SetupError::AlreadyRunning);
        }
        self.progress = ProgressReporter::new();
        Ok(FinishGuard {
            busy: self.busy.clone(),
            progress: self.progress.clone(),
        })
    }

    async fn run(&self, url: &str, dest: &Path, cancel: &CancellationToken) -> SetupResult<u64> {
        let options = TransferOptions {
            chunk_size: self.chunk_size,
            expected_sha1: None,
            cancel,
        };
        let progress = &self.progress;
        let mut on_progress = |written: u64, total: Option<u64>| {
            // Without a length the percentage stays indeterminate until the end.
            if let Some(total) = total.filter(|t| *t > 0) {
                progress.set_percent((written as f64 / total as f64 * 100.0) as f32);
            }
        };
        let bytes =
            stream_to_file(&self.client, url, dest, &options, &mut on_progress).await?;
        progress.set_percent(100.0);
        Ok(bytes)
    }
}

/// Releases the run flag, then publishes `finished`, even if the task unwinds.
struct FinishGuard {
    busy: Arc<AtomicBool>,
    progress: ProgressReporter,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        self.progress.finish();
    }
}

// ── Shared transfer primitives ──────────────────────────

/// Learn a remote body's length from its `Content-Length` header.
///
/// The body itself is never read. A missing or unparsable header, or an
/// error status, yields `None`.
pub(crate) async fn probe_content_length(client: &Client, url: &str) -> SetupResult<Option<u64>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| SetupError::Source {
            url: url.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        debug!("Size probe {} -> status {}", url, response.status());
        return Ok(None);
    }

    let length = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());

    debug!("Size probe {} -> {:?}", url, length);
    Ok(length)
}

/// GET `url` and write the body to `dest` in `chunk_size` pieces, calling
/// `on_progress(bytes_written, content_length)` after each piece.
///
/// The destination is truncated if it exists. A partially written file is
/// removed when the transfer fails.
pub(crate) async fn stream_to_file(
    client: &Client,
    url: &str,
    dest: &Path,
    options: &TransferOptions<'_>,
    on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
) -> SetupResult<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| SetupError::Source {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(SetupError::DownloadFailed {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let total = response.content_length();

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| SetupError::Destination {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let file = tokio::fs::File::create(dest)
        .await
        .map_err(|source| SetupError::Destination {
            path: dest.to_path_buf(),
            source,
        })?;

    let result = write_body(response, file, url, dest, total, options, on_progress).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(dest).await {
            debug!("Could not remove partial download {:?}: {}", dest, e);
        }
    }
    result
}

async fn write_body(
    response: reqwest::Response,
    file: tokio::fs::File,
    url: &str,
    dest: &Path,
    total: Option<u64>,
    options: &TransferOptions<'_>,
    on_progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
) -> SetupResult<u64> {
    let io_err = |source: std::io::Error| SetupError::Io {
        path: dest.to_path_buf(),
        source,
    };

    let mut writer = tokio::io::BufWriter::new(file);
    let mut hasher = options.expected_sha1.map(|_| Sha1::new());
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    loop {
        let next = tokio::select! {
            _ = options.cancel.cancelled() => return Err(SetupError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|source| SetupError::Source {
            url: url.to_string(),
            source,
        })?;

        for piece in chunk.chunks(options.chunk_size) {
            writer.write_all(piece).await.map_err(io_err)?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(piece);
            }
            written += piece.len() as u64;
            on_progress(written, total);
        }
    }

    writer.flush().await.map_err(io_err)?;
    // Close before the caller touches the path again.
    drop(writer);

    if let (Some(expected), Some(hasher)) = (options.expected_sha1, hasher) {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(SetupError::Sha1Mismatch {
                path: dest.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
    }

    debug!("Downloaded: {} -> {:?} ({} bytes)", url, dest, written);
    Ok(written)
}
