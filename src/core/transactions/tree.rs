// ─── Directory Tree Operations ───
// Sizing, copying and moving whole trees. Traversal keeps its own work-list
// so tree depth is bounded by memory, not by the call stack.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::error::{SetupError, SetupResult};

#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE
#[cfg(not(windows))]
const CROSS_DEVICE_ERROR: i32 = 18; // EXDEV

fn io_at(path: &Path) -> impl Fn(std::io::Error) -> SetupError + '_ {
    move |source| SetupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Sum of the lengths of every file below `root`.
pub async fn directory_size(root: &Path) -> SetupResult<u64> {
    let mut total = 0u64;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_at(&dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_at(&dir))? {
            let file_type = entry.file_type().await.map_err(io_at(&entry.path()))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else {
                let metadata = entry.metadata().await.map_err(io_at(&entry.path()))?;
                total += metadata.len();
            }
        }
    }

    Ok(total)
}

/// Copy the tree at `source` so that it appears at `dest`.
///
/// Missing destination directories are created; existing files are overwritten.
/// Returns the number of bytes copied.
pub async fn copy_directory(source: &Path, dest: &Path) -> SetupResult<u64> {
    let mut copied = 0u64;
    // Paths relative to `source`, so each destination is `dest.join(rel)`.
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let from_dir = source.join(&relative);
        let to_dir = dest.join(&relative);
        tokio::fs::create_dir_all(&to_dir)
            .await
            .map_err(io_at(&to_dir))?;

        let mut entries = tokio::fs::read_dir(&from_dir)
            .await
            .map_err(io_at(&from_dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_at(&from_dir))? {
            let file_type = entry.file_type().await.map_err(io_at(&entry.path()))?;
            if file_type.is_dir() {
                pending.push(relative.join(entry.file_name()));
            } else {
                let target = to_dir.join(entry.file_name());
                copied += tokio::fs::copy(entry.path(), &target)
                    .await
                    .map_err(io_at(&target))?;
            }
        }
    }

    debug!("Copied tree {:?} -> {:?} ({} bytes)", source, dest, copied);
    Ok(copied)
}

/// Copy a single file, creating the destination's parent directories.
pub async fn copy_file(source: &Path, dest: &Path) -> SetupResult<u64> {
    ensure_parent(dest).await?;
    tokio::fs::copy(source, dest).await.map_err(io_at(dest))
}

/// Rename `source` to `dest`, falling back to copy-then-delete when the two
/// live on different devices.
pub async fn move_path(source: &Path, dest: &Path, is_dir: bool) -> SetupResult<()> {
    ensure_parent(dest).await?;
    match tokio::fs::rename(source, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERROR) => {
            warn!(
                "Cannot rename {:?} across devices, copying instead: {}",
                source, e
            );
            if is_dir {
                copy_directory(source, dest).await?;
            } else {
                copy_file(source, dest).await?;
            }
            remove_path(source, is_dir).await
        }
        Err(source_err) => Err(SetupError::Io {
            path: source.to_path_buf(),
            source: source_err,
        }),
    }
}

/// Remove a file, or a directory and everything below it.
pub async fn remove_path(path: &Path, is_dir: bool) -> SetupResult<()> {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    result.map_err(io_at(path))
}

async fn ensure_parent(path: &Path) -> SetupResult<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_at(parent)),
        None => Ok(()),
    }
}
