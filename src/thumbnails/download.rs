//! Single thumbnail download into the cache directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::contacts::Transport;
use crate::error::DownloadError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How the downloaded bytes ended up at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
  /// This download wrote the file
  Written,
  /// Another writer got there first; its file was kept
  AlreadyPresent,
}

pub struct DownloadCoordinator<T: Transport> {
  transport: Arc<T>,
}

impl<T: Transport> DownloadCoordinator<T> {
  pub fn new(transport: Arc<T>) -> Self {
    Self { transport }
  }

  /// Fetch `url` and move the bytes to `destination`.
  ///
  /// The bytes are staged in a temporary file next to the destination and
  /// linked into place, so the destination is never observed half-written and
  /// an existing file is never replaced.
  pub async fn download(&self, url: &Url, destination: &Path) -> Result<Placement, DownloadError> {
    let bytes = self.transport.get(url).await?;

    if let Some(dir) = destination.parent() {
      tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_error(dir, e))?;
    }

    let staged = staging_path(destination);
    tokio::fs::write(&staged, &bytes)
      .await
      .map_err(|e| io_error(&staged, e))?;

    let placed = place(&staged, destination).await;
    match tokio::fs::remove_file(&staged).await {
      Err(e) if e.kind() != io::ErrorKind::NotFound => {
        debug!(path = %staged.display(), error = %e, "Failed to remove staging file");
      }
      _ => {}
    }

    match placed {
      Ok(Placement::Written) => {
        debug!(%url, path = %destination.display(), size = bytes.len(), "Thumbnail written");
        Ok(Placement::Written)
      }
      Ok(Placement::AlreadyPresent) => {
        debug!(path = %destination.display(), "Thumbnail already on disk");
        Ok(Placement::AlreadyPresent)
      }
      Err(e) => Err(io_error(destination, e)),
    }
  }
}

/// Link `staged` to `destination` without replacing an existing file.
///
/// Filesystems without hard links fall back to a rename guarded by an
/// existence check, which can lose a race with another writer.
async fn place(staged: &Path, destination: &Path) -> io::Result<Placement> {
  match tokio::fs::hard_link(staged, destination).await {
    Ok(()) => Ok(Placement::Written),
    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(Placement::AlreadyPresent),
    Err(e) => {
      debug!(path = %destination.display(), error = %e, "Hard link failed, renaming");
      rename_unless_present(staged, destination).await
    }
  }
}

async fn rename_unless_present(staged: &Path, destination: &Path) -> io::Result<Placement> {
  if tokio::fs::try_exists(destination).await? {
    return Ok(Placement::AlreadyPresent);
  }
  tokio::fs::rename(staged, destination).await?;
  Ok(Placement::Written)
}

fn staging_path(destination: &Path) -> PathBuf {
  let name = destination
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  destination.with_file_name(format!(
    ".{}.{}.{}.part",
    name,
    std::process::id(),
    TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
  ))
}

fn io_error(path: &Path, e: io::Error) -> DownloadError {
  DownloadError::Io {
    path: path.display().to_string(),
    message: e.to_string(),
  }
}
