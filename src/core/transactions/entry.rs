use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::tree;
use crate::core::downloader::{probe_content_length, stream_to_file, TransferOptions};
use crate::core::error::{SetupError, SetupResult};

/// The operation an entry performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Copy,
    Move,
    Download,
    Delete,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Copy => write!(f, "copy"),
            TransactionKind::Move => write!(f, "move"),
            TransactionKind::Download => write!(f, "download"),
            TransactionKind::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for TransactionKind {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" => Ok(TransactionKind::Copy),
            "move" => Ok(TransactionKind::Move),
            "download" => Ok(TransactionKind::Download),
            "delete" => Ok(TransactionKind::Delete),
            other => Err(SetupError::InvalidTransaction(format!(
                "unknown transaction kind {other:?}"
            ))),
        }
    }
}

/// What an entry needs from the batch while it executes.
pub struct ExecContext<'a> {
    pub client: &'a Client,
    pub chunk_size: usize,
    pub cancel: &'a CancellationToken,
}

/// One scheduled filesystem or network operation.
#[derive(Debug, Clone)]
pub struct TransactionEntry {
    kind: TransactionKind,
    /// Filesystem path, or URL for downloads.
    source: String,
    destination: Option<PathBuf>,
    optional: bool,
    expected_sha1: Option<String>,
    cached_size: Option<u64>,
}

impl TransactionEntry {
    pub fn new(
        kind: TransactionKind,
        source: impl Into<String>,
        destination: Option<PathBuf>,
        optional: bool,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            destination,
            optional,
            expected_sha1: None,
            cached_size: None,
        }
    }

    /// Verify a download against a SHA-1 hex digest.
    pub fn with_sha1(mut self, sha1: impl Into<String>) -> Self {
        self.expected_sha1 = Some(sha1.into());
        self
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_path(&self) -> &Path {
        Path::new(&self.source)
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Size computed by an earlier call to [`size`](Self::size), if any.
    pub fn cached_size(&self) -> Option<u64> {
        self.cached_size
    }

    // ── Sizing ──────────────────────────────────────────

    /// Bytes this entry moves: file length, recursive tree size, or the
    /// remote `Content-Length`. Anything that cannot be measured counts as 0.
    /// Computed once, then memoized.
    pub async fn size(&mut self, client: &Client) -> u64 {
        if let Some(size) = self.cached_size {
            return size;
        }

        let size = match self.kind {
            TransactionKind::Download => match probe_content_length(client, &self.source).await {
                Ok(length) => length.unwrap_or(0),
                Err(e) => {
                    warn!("Size probe failed for {}: {}", self.source, e);
                    0
                }
            },
            _ => self.local_size().await,
        };

        self.cached_size = Some(size);
        size
    }

    async fn local_size(&self) -> u64 {
        let path = self.source_path();
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => match tree::directory_size(path).await {
                Ok(size) => size,
                Err(e) => {
                    warn!("Could not size directory {:?}: {}", path, e);
                    0
                }
            },
            Ok(meta) => meta.len(),
            Err(_) => 0,
        }
    }

    // ── Execution ───────────────────────────────────────

    /// Perform the operation. `on_bytes` receives the running byte count of a
    /// download as it streams.
    pub async fn execute(
        &self,
        ctx: &ExecContext<'_>,
        on_bytes: &mut (dyn FnMut(u64) + Send),
    ) -> SetupResult<()> {
        match self.kind {
            TransactionKind::Delete => self.delete().await,
            TransactionKind::Copy => self.copy(self.require_destination()?).await,
            TransactionKind::Move => self.relocate(self.require_destination()?).await,
            TransactionKind::Download => {
                self.download(self.require_destination()?, ctx, on_bytes)
                    .await
            }
        }
    }

    fn require_destination(&self) -> SetupResult<&Path> {
        self.destination.as_deref().ok_or_else(|| {
            SetupError::InvalidTransaction(format!(
                "{} of {} has no destination",
                self.kind, self.source
            ))
        })
    }

    /// Whether the source exists and is a directory. `None` when it is absent
    /// and that is acceptable; an error when it is absent and required.
    async fn locate_source(&self) -> SetupResult<Option<bool>> {
        let path = self.source_path();
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.is_dir())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.optional {
                    debug!("Optional {} skipped, {:?} is absent", self.kind, path);
                    Ok(None)
                } else {
                    Err(SetupError::MissingSource(path.to_path_buf()))
                }
            }
            Err(source) => Err(SetupError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn delete(&self) -> SetupResult<()> {
        let Some(is_dir) = self.locate_source().await? else {
            return Ok(());
        };
        tree::remove_path(self.source_path(), is_dir).await
    }

    async fn copy(&self, dest: &Path) -> SetupResult<()> {
        let Some(is_dir) = self.locate_source().await? else {
            return Ok(());
        };
        if is_dir {
            tree::copy_directory(self.source_path(), dest).await?;
        } else {
            tree::copy_file(self.source_path(), dest).await?;
        }
        Ok(())
    }

    async fn relocate(&self, dest: &Path) -> SetupResult<()> {
        let Some(is_dir) = self.locate_source().await? else {
            return Ok(());
        };
        tree::move_path(self.source_path(), dest, is_dir).await
    }

    async fn download(
        &self,
        dest: &Path,
        ctx: &ExecContext<'_>,
        on_bytes: &mut (dyn FnMut(u64) + Send),
    ) -> SetupResult<()> {
        match reqwest::Url::parse(&self.source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(SetupError::InvalidTransaction(format!(
                    "download source is not an http(s) URL: {}",
                    self.source
                )))
            }
        }

        let options = TransferOptions {
            chunk_size: ctx.chunk_size,
            expected_sha1: self.expected_sha1.as_deref(),
            cancel: ctx.cancel,
        };
        let mut on_progress = |written: u64, _total: Option<u64>| on_bytes(written);
        match stream_to_file(ctx.client, &self.source, dest, &options, &mut on_progress).await {
            Ok(_) => Ok(()),
            Err(SetupError::Source { .. } | SetupError::DownloadFailed { .. }) if self.optional => {
                debug!("Optional download skipped, {} is unreachable", self.source);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(entry: &TransactionEntry) -> SetupResult<()> {
        let client = Client::new();
        let cancel = CancellationToken::new();
        let ctx = ExecContext {
            client: &client,
            chunk_size: 4096,
            cancel: &cancel,
        };
        entry.execute(&ctx, &mut |_: u64| {}).await
    }

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("Copy".parse::<TransactionKind>().unwrap(), TransactionKind::Copy);
        assert_eq!(" delete ".parse::<TransactionKind>().unwrap(), TransactionKind::Delete);
        assert!(matches!(
            "rename".parse::<TransactionKind>(),
            Err(SetupError::InvalidTransaction(_))
        ));
    }

    #[tokio::test]
    async fn optional_missing_source_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let missing = path_str(&dir.path().join("nope.json"));
        let dest = dir.path().join("dest.json");

        for kind in [TransactionKind::Copy, TransactionKind::Move, TransactionKind::Delete] {
            let entry = TransactionEntry::new(kind, missing.clone(), Some(dest.clone()), true);
            run(&entry).await.unwrap();
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn required_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = path_str(&dir.path().join("nope.json"));
        let entry = TransactionEntry::new(
            TransactionKind::Copy,
            missing,
            Some(dir.path().join("dest.json")),
            false,
        );
        assert!(matches!(run(&entry).await, Err(SetupError::MissingSource(_))));
    }

    #[tokio::test]
    async fn missing_destination_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"abc").unwrap();
        let entry = TransactionEntry::new(TransactionKind::Move, path_str(&src), None, false);
        assert!(matches!(run(&entry).await, Err(SetupError::InvalidTransaction(_))));
        assert!(src.exists());
    }

    #[tokio::test]
    async fn download_requires_http_url() {
        let dir = tempfile::tempdir().unwrap();
        let entry = TransactionEntry::new(
            TransactionKind::Download,
            "ftp://example.com/file",
            Some(dir.path().join("file")),
            false,
        );
        assert!(matches!(run(&entry).await, Err(SetupError::InvalidTransaction(_))));
    }

    #[tokio::test]
    async fn size_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, vec![0u8; 300]).unwrap();
        let mut entry = TransactionEntry::new(TransactionKind::Delete, path_str(&src), None, false);

        let client = Client::new();
        assert_eq!(entry.size(&client).await, 300);
        std::fs::write(&src, vec![0u8; 10]).unwrap();
        assert_eq!(entry.size(&client).await, 300);
        assert_eq!(entry.cached_size(), Some(300));
    }

    #[tokio::test]
    async fn missing_file_sizes_as_zero() {
        let mut entry =
            TransactionEntry::new(TransactionKind::Delete, "/definitely/not/here", None, false);
        assert_eq!(entry.size(&Client::new()).await, 0);
    }

    #[tokio::test]
    async fn unreachable_download_sizes_as_zero() {
        let mut entry = TransactionEntry::new(
            TransactionKind::Download,
            "http://127.0.0.1:1/server.jar",
            Some(PathBuf::from("server.jar")),
            false,
        );
        assert_eq!(entry.size(&Client::new()).await, 0);
        assert_eq!(entry.cached_size(), Some(0));
    }

    #[tokio::test]
    async fn download_without_length_sizes_as_zero_and_still_runs() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\neula=false\n")
                    .await;
                let _ = socket.shutdown().await;
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("eula.txt");
        let mut entry = TransactionEntry::new(
            TransactionKind::Download,
            format!("http://{addr}/eula.txt"),
            Some(dest.clone()),
            false,
        );
        assert_eq!(entry.size(&Client::new()).await, 0);

        run(&entry).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"eula=false\n");
    }

    #[tokio::test]
    async fn optional_unreachable_download_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("server.jar");
        let entry = TransactionEntry::new(
            TransactionKind::Download,
            "http://127.0.0.1:1/server.jar",
            Some(dest.clone()),
            true,
        );
        run(&entry).await.unwrap();
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn copy_file_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("ops.json");
        std::fs::write(&src, b"[]").unwrap();
        let dest = dir.path().join("server/backups/ops.json.back");
        let entry =
            TransactionEntry::new(TransactionKind::Copy, path_str(&src), Some(dest.clone()), false);
        run(&entry).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"[]");
    }
}
