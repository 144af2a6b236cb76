//! Disk-backed thumbnail cache with per-key download deduplication.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use url::Url;

use super::download::DownloadCoordinator;
use crate::contacts::Transport;
use crate::error::DownloadError;

/// Joins the trailing path segments of a thumbnail URL into a file name.
pub const KEY_DELIMITER: &str = ".";

/// Number of trailing path segments that identify an image.
const KEY_SEGMENTS: usize = 3;

type Outcome = Result<PathBuf, DownloadError>;

/// File name under the cache directory, plus the URL it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  name: String,
  source: Url,
}

impl CacheKey {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn source(&self) -> &Url {
    &self.source
  }
}

/// Derive the cache key for an image URL.
///
/// The last three path segments are joined with [`KEY_DELIMITER`], so
/// `https://host/api/portraits/thumb/men/1.jpg` becomes `thumb.men.1.jpg`.
/// URLs with fewer than three segments are not cacheable.
pub fn resolve(url: &str) -> Option<CacheKey> {
  let source = Url::parse(url).ok()?;
  let segments: Vec<&str> = source.path_segments()?.filter(|s| !s.is_empty()).collect();
  if segments.len() < KEY_SEGMENTS {
    return None;
  }

  let name = segments[segments.len() - KEY_SEGMENTS..].join(KEY_DELIMITER);
  Some(CacheKey { name, source })
}

/// Lifecycle of a cache key as seen by this process.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
  Absent,
  Downloading,
  OnDisk,
}

enum Entry {
  Downloading(Vec<oneshot::Sender<Outcome>>),
  OnDisk(PathBuf),
}

/// Answer to [`ThumbnailCache::request`].
#[derive(Debug)]
pub enum ImageResult {
  /// Bytes are already on disk
  Ready(PathBuf),
  /// A download is in flight; the waiter resolves exactly once
  Pending(Waiter),
}

/// Completion handle for one caller of a pending download.
#[derive(Debug)]
pub struct Waiter(oneshot::Receiver<Outcome>);

impl Waiter {
  pub async fn wait(self) -> Outcome {
    self.0.await.unwrap_or(Err(DownloadError::Abandoned))
  }
}

pub struct ThumbnailCache<T: Transport> {
  dir: PathBuf,
  coordinator: Arc<DownloadCoordinator<T>>,
  entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl<T: Transport> Clone for ThumbnailCache<T> {
  fn clone(&self) -> Self {
    Self {
      dir: self.dir.clone(),
      coordinator: Arc::clone(&self.coordinator),
      entries: Arc::clone(&self.entries),
    }
  }
}

impl<T: Transport> ThumbnailCache<T> {
  pub fn new(dir: impl Into<PathBuf>, transport: Arc<T>) -> Self {
    Self {
      dir: dir.into(),
      coordinator: Arc::new(DownloadCoordinator::new(transport)),
      entries: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  #[cfg(test)]
  pub fn entry_state(&self, key: &CacheKey) -> EntryState {
    match lock(&self.entries).get(key.name()) {
      None => EntryState::Absent,
      Some(Entry::Downloading(_)) => EntryState::Downloading,
      Some(Entry::OnDisk(_)) => EntryState::OnDisk,
    }
  }

  /// Serve `key` from disk, join its in-flight download, or start one.
  ///
  /// Must be called from within a tokio runtime when a download may start.
  pub fn request(&self, key: &CacheKey) -> ImageResult {
    if let Some(known) = join_entry(&mut lock(&self.entries), key) {
      return known;
    }

    // Stat outside the lock, then re-check the map
    let destination = self.dir.join(key.name());
    let on_disk = destination.is_file();

    let mut entries = lock(&self.entries);
    if let Some(known) = join_entry(&mut entries, key) {
      return known;
    }

    if on_disk {
      debug!(key = key.name(), "Thumbnail found on disk");
      entries.insert(key.name.clone(), Entry::OnDisk(destination.clone()));
      return ImageResult::Ready(destination);
    }

    let (tx, rx) = oneshot::channel();
    entries.insert(key.name.clone(), Entry::Downloading(vec![tx]));
    drop(entries);

    debug!(key = key.name(), url = %key.source(), "Starting thumbnail download");
    self.spawn_download(key.clone(), destination);
    ImageResult::Pending(Waiter(rx))
  }

  /// Resolve `key` to a path, downloading if needed.
  pub async fn fetch(&self, key: &CacheKey) -> Outcome {
    match self.request(key) {
      ImageResult::Ready(path) => Ok(path),
      ImageResult::Pending(waiter) => waiter.wait().await,
    }
  }

  fn spawn_download(&self, key: CacheKey, destination: PathBuf) {
    let coordinator = Arc::clone(&self.coordinator);
    let entries = Arc::clone(&self.entries);

    tokio::spawn(async move {
      let settled = AssertUnwindSafe(coordinator.download(key.source(), &destination))
        .catch_unwind()
        .await;
      let outcome = match settled {
        Ok(result) => result.map(|_| destination),
        Err(_) => Err(DownloadError::Abandoned),
      };
      complete(&entries, key.name(), outcome);
    });
  }
}

/// Answer from the map alone: a known path, or a place in the download queue.
fn join_entry(entries: &mut HashMap<String, Entry>, key: &CacheKey) -> Option<ImageResult> {
  match entries.get_mut(key.name())? {
    Entry::OnDisk(path) => Some(ImageResult::Ready(path.clone())),
    Entry::Downloading(waiters) => {
      let (tx, rx) = oneshot::channel();
      waiters.push(tx);
      debug!(key = key.name(), waiters = waiters.len(), "Joined in-flight download");
      Some(ImageResult::Pending(Waiter(rx)))
    }
  }
}

/// Settle a download: record the new state, then wake waiters in order.
fn complete(entries: &Mutex<HashMap<String, Entry>>, name: &str, outcome: Outcome) {
  let waiters = {
    let mut entries = lock(entries);
    let waiters = match entries.remove(name) {
      Some(Entry::Downloading(waiters)) => waiters,
      _ => Vec::new(),
    };
    if let Ok(path) = &outcome {
      entries.insert(name.to_string(), Entry::OnDisk(path.clone()));
    }
    waiters
  };

  match &outcome {
    Ok(path) => debug!(key = name, path = %path.display(), waiters = waiters.len(), "Thumbnail ready"),
    Err(e) => warn!(key = name, error = %e, waiters = waiters.len(), "Thumbnail download failed"),
  }

  for waiter in waiters {
    let _ = waiter.send(outcome.clone());
  }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
