use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::ErrorKind;

/// Notifications from the sync engine and thumbnail cache to the front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// Store contents were replaced by a committed sync
  DataChanged,
  /// The thumbnail for a record is on disk
  ImageReady { record_key: String, path: PathBuf },
  /// A sync or download failed
  Error { kind: ErrorKind, message: String },
}

/// Sending half handed to the core. Delivery is fire-and-forget: if the
/// receiving side is gone, events are dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
  tx: mpsc::UnboundedSender<Event>,
}

impl Notifier {
  /// Create a notifier and the receiver the front end drains.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  pub fn data_changed(&self) {
    self.send(Event::DataChanged);
  }

  pub fn image_ready(&self, record_key: impl Into<String>, path: PathBuf) {
    self.send(Event::ImageReady {
      record_key: record_key.into(),
      path,
    });
  }

  pub fn error(&self, kind: ErrorKind, message: impl Into<String>) {
    self.send(Event::Error {
      kind,
      message: message.into(),
    });
  }

  fn send(&self, event: Event) {
    let _ = self.tx.send(event);
  }
}
