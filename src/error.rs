//! Error types for the sync path and the thumbnail cache.

use thiserror::Error;

/// Coarse classification of a failure, forwarded to the UI alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Transport,
  MalformedPayload,
  UnexpectedEnvelope,
  EmptyResult,
  Persistence,
  SyncInProgress,
  Download,
}

#[derive(Error, Debug)]
pub enum SyncError {
  #[error("Network request failed: {0}")]
  Transport(String),

  #[error("Data format is not supported: {0}")]
  MalformedPayload(String),

  #[error("Data format error: {0}")]
  UnexpectedEnvelope(String),

  #[error("Random user server did not provide any data")]
  EmptyResult,

  #[error("Failed to save contacts: {0}")]
  Persistence(#[from] StoreError),

  #[error("A sync is already in progress")]
  SyncInProgress,
}

impl SyncError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Transport(_) => ErrorKind::Transport,
      Self::MalformedPayload(_) => ErrorKind::MalformedPayload,
      Self::UnexpectedEnvelope(_) => ErrorKind::UnexpectedEnvelope,
      Self::EmptyResult => ErrorKind::EmptyResult,
      Self::Persistence(_) => ErrorKind::Persistence,
      Self::SyncInProgress => ErrorKind::SyncInProgress,
    }
  }
}

impl From<TransportError> for SyncError {
  fn from(e: TransportError) -> Self {
    Self::Transport(e.0)
  }
}

/// Failure reported by a [`Transport`](crate::contacts::client::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("failed to create store directory: {0}")]
  Io(#[from] std::io::Error),
}

/// Failure of one thumbnail download. Cloned once per waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
  #[error("download failed: {0}")]
  Transport(String),

  #[error("failed to write {path}: {message}")]
  Io { path: String, message: String },

  #[error("download task ended without a result")]
  Abandoned,
}

impl From<TransportError> for DownloadError {
  fn from(e: TransportError) -> Self {
    Self::Transport(e.0)
  }
}
