//! Fetch, parse, normalize and reconcile one generation of contacts.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

use super::client::{users_url, Transport};
use super::normalize::normalize;
use super::parser;
use super::types::ContactRecord;
use crate::error::{StoreError, SyncError};
use crate::event::Notifier;
use crate::store::ContactStore;

/// Stage of the sync currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Fetching,
  Parsing,
  Reconciling,
}

/// Owns the contact store and the single outstanding sync.
pub struct ContactSyncEngine<T: Transport, S: ContactStore> {
  transport: Arc<T>,
  store: Mutex<S>,
  notifier: Notifier,
  state: Mutex<SyncState>,
}

impl<T: Transport, S: ContactStore> ContactSyncEngine<T, S> {
  pub fn new(transport: Arc<T>, store: S, notifier: Notifier) -> Self {
    Self {
      transport,
      store: Mutex::new(store),
      notifier,
      state: Mutex::new(SyncState::Idle),
    }
  }

  #[cfg(test)]
  pub fn state(&self) -> SyncState {
    *lock(&self.state)
  }

  /// Replace the stored contacts with `result_count` users from `endpoint`.
  ///
  /// Success is announced with `DataChanged` after the store commits; every
  /// failure is announced once as an `Error` event and also returned. The
  /// store is untouched unless the failure happens during reconciliation.
  pub async fn sync(&self, endpoint: &Url, result_count: u32) -> Result<usize, SyncError> {
    let result = self.run(endpoint, result_count).await;
    match &result {
      Ok(count) => {
        info!(count, "Contacts synced");
        self.notifier.data_changed();
      }
      Err(e) => {
        warn!(error = %e, "Contact sync failed");
        self.notifier.error(e.kind(), e.to_string());
      }
    }
    result
  }

  async fn run(&self, endpoint: &Url, result_count: u32) -> Result<usize, SyncError> {
    let guard = StateGuard::acquire(&self.state)?;

    guard.set(SyncState::Fetching);
    let url = users_url(endpoint, result_count);
    debug!(%url, "Fetching contacts");
    let body = self.transport.get(&url).await?;

    guard.set(SyncState::Parsing);
    let raw_users = parser::parse(&body)?;
    let records: Vec<ContactRecord> = raw_users.iter().filter_map(normalize).collect();
    debug!(
      received = raw_users.len(),
      accepted = records.len(),
      "Normalized contacts"
    );
    if records.is_empty() {
      return Err(SyncError::EmptyResult);
    }

    guard.set(SyncState::Reconciling);
    self.reconcile(&records)?;

    Ok(records.len())
  }

  /// Clear, insert, commit. A failure part way is not retried; the store
  /// decides what survives it.
  fn reconcile(&self, records: &[ContactRecord]) -> Result<(), StoreError> {
    let mut store = lock(&self.store);
    store.clear_all()?;
    for record in records {
      store.insert(record)?;
    }
    store.commit()
  }

  /// Current records in display order.
  pub fn contacts(&self) -> Result<Vec<ContactRecord>, StoreError> {
    lock(&self.store).sorted_view()
  }

  /// Run `f` with read access to the underlying store.
  pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
    f(&lock(&self.store))
  }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a sync as active and returns the engine to idle when dropped.
struct StateGuard<'a> {
  state: &'a Mutex<SyncState>,
}

impl<'a> StateGuard<'a> {
  fn acquire(state: &'a Mutex<SyncState>) -> Result<Self, SyncError> {
    let mut current = lock(state);
    if *current != SyncState::Idle {
      return Err(SyncError::SyncInProgress);
    }
    *current = SyncState::Fetching;
    Ok(Self { state })
  }

  fn set(&self, next: SyncState) {
    debug!(?next, "Sync state");
    *lock(self.state) = next;
  }
}

impl Drop for StateGuard<'_> {
  fn drop(&mut self) {
    *lock(self.state) = SyncState::Idle;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{ErrorKind, TransportError};
  use crate::event::Event;
  use crate::store::SqliteStore;
  use async_trait::async_trait;
  use bytes::Bytes;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::sync::{mpsc, Notify};

  struct FakeTransport {
    response: Result<Bytes, TransportError>,
    calls: AtomicUsize,
  }

  impl FakeTransport {
    fn body(body: &str) -> Arc<Self> {
      Arc::new(Self {
        response: Ok(Bytes::from(body.to_string())),
        calls: AtomicUsize::new(0),
      })
    }

    fn failing(message: &str) -> Arc<Self> {
      Arc::new(Self {
        response: Err(TransportError(message.to_string())),
        calls: AtomicUsize::new(0),
      })
    }
  }

  #[async_trait]
  impl Transport for FakeTransport {
    async fn get(&self, _url: &Url) -> Result<Bytes, TransportError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.response.clone()
    }
  }

  /// Store that logs every call and can fail on a chosen operation.
  #[derive(Default)]
  struct RecordingStore {
    log: Arc<Mutex<Vec<String>>>,
    records: Vec<ContactRecord>,
    fail_on: Option<&'static str>,
  }

  impl RecordingStore {
    fn check(&self, op: &'static str) -> Result<(), StoreError> {
      self.log.lock().unwrap().push(op.to_string());
      if self.fail_on == Some(op) {
        return Err(StoreError::Io(std::io::Error::other("disk full")));
      }
      Ok(())
    }
  }

  impl ContactStore for RecordingStore {
    fn clear_all(&mut self) -> Result<(), StoreError> {
      self.check("clear")?;
      self.records.clear();
      Ok(())
    }

    fn insert(&mut self, record: &ContactRecord) -> Result<(), StoreError> {
      self.check("insert")?;
      self.records.push(record.clone());
      Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
      self.check("commit")
    }

    fn sorted_view(&self) -> Result<Vec<ContactRecord>, StoreError> {
      Ok(self.records.clone())
    }
  }

  fn endpoint() -> Url {
    Url::parse("https://randomuser.test/api/").unwrap()
  }

  fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
      events.push(e);
    }
    events
  }

  fn seeded_store() -> SqliteStore {
    let mut store = SqliteStore::open_in_memory().unwrap();
    store.clear_all().unwrap();
    store
      .insert(&ContactRecord {
        key: "old".to_string(),
        first_name: "Old".to_string(),
        last_name: "Timer".to_string(),
        ..Default::default()
      })
      .unwrap();
    store.commit().unwrap();
    store
  }

  #[tokio::test]
  async fn test_sync_single_user() {
    let (notifier, mut rx) = Notifier::channel();
    let transport =
      FakeTransport::body(r#"{"results":[{"name":{"first":"ann","last":"lee"},"email":"a@x.com"}]}"#);
    let engine = ContactSyncEngine::new(transport.clone(), seeded_store(), notifier);

    assert_eq!(engine.sync(&endpoint(), 1).await.unwrap(), 1);

    let contacts = engine.contacts().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].first_name, "Ann");
    assert_eq!(contacts[0].last_name, "Lee");
    assert_eq!(contacts[0].email.as_deref(), Some("a@x.com"));
    assert_eq!(drain(&mut rx), vec![Event::DataChanged]);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state(), SyncState::Idle);
  }

  #[tokio::test]
  async fn test_empty_results_leave_store_untouched() {
    let (notifier, mut rx) = Notifier::channel();
    let engine = ContactSyncEngine::new(
      FakeTransport::body(r#"{"results":[]}"#),
      seeded_store(),
      notifier,
    );

    assert!(matches!(
      engine.sync(&endpoint(), 30).await,
      Err(SyncError::EmptyResult)
    ));
    assert_eq!(engine.contacts().unwrap()[0].key, "old");

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
      events[0],
      Event::Error {
        kind: ErrorKind::EmptyResult,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn test_all_users_rejected_is_empty_result() {
    let (notifier, _rx) = Notifier::channel();
    let engine = ContactSyncEngine::new(
      FakeTransport::body(r#"{"results":[{"email":"a@x.com"},{"name":{"first":""}}]}"#),
      seeded_store(),
      notifier,
    );

    assert!(matches!(
      engine.sync(&endpoint(), 30).await,
      Err(SyncError::EmptyResult)
    ));
    assert_eq!(engine.contacts().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_non_mapping_payload_is_malformed() {
    for body in ["[]", "\"text\"", "17", ""] {
      let (notifier, mut rx) = Notifier::channel();
      let engine = ContactSyncEngine::new(FakeTransport::body(body), seeded_store(), notifier);

      assert!(matches!(
        engine.sync(&endpoint(), 30).await,
        Err(SyncError::MalformedPayload(_))
      ));
      assert_eq!(engine.contacts().unwrap()[0].key, "old");
      assert!(matches!(
        drain(&mut rx)[..],
        [Event::Error {
          kind: ErrorKind::MalformedPayload,
          ..
        }]
      ));
    }
  }

  #[tokio::test]
  async fn test_transport_failure_carries_message() {
    let (notifier, mut rx) = Notifier::channel();
    let store = RecordingStore::default();
    let log = store.log.clone();
    let engine = ContactSyncEngine::new(FakeTransport::failing("connection refused"), store, notifier);

    match engine.sync(&endpoint(), 30).await {
      Err(SyncError::Transport(message)) => assert!(message.contains("connection refused")),
      other => panic!("unexpected result: {:?}", other),
    }
    assert!(log.lock().unwrap().is_empty());
    assert!(matches!(
      drain(&mut rx)[..],
      [Event::Error {
        kind: ErrorKind::Transport,
        ..
      }]
    ));
  }

  #[tokio::test]
  async fn test_reconcile_order_and_input_order() {
    let (notifier, mut rx) = Notifier::channel();
    let store = RecordingStore::default();
    let log = store.log.clone();
    let body = r#"{"results":[
      {"name":{"first":"zed","last":"young"}},
      {"email":"nameless@x.com"},
      {"user":{"name":{"first":"ann","last":"adams"}},"seed":"s"}
    ]}"#;
    let engine = ContactSyncEngine::new(FakeTransport::body(body), store, notifier);

    assert_eq!(engine.sync(&endpoint(), 3).await.unwrap(), 2);
    assert_eq!(
      *log.lock().unwrap(),
      vec!["clear", "insert", "insert", "commit"]
    );

    let names: Vec<String> = engine
      .contacts()
      .unwrap()
      .iter()
      .map(|r| r.display_name())
      .collect();
    assert_eq!(names, vec!["Zed Young", "Ann Adams"]);
    assert_eq!(drain(&mut rx), vec![Event::DataChanged]);
  }

  #[tokio::test]
  async fn test_persistence_failure_is_surfaced() {
    let (notifier, mut rx) = Notifier::channel();
    let store = RecordingStore {
      fail_on: Some("commit"),
      ..Default::default()
    };
    let engine = ContactSyncEngine::new(
      FakeTransport::body(r#"{"results":[{"name":{"first":"ann"}}]}"#),
      store,
      notifier,
    );

    assert!(matches!(
      engine.sync(&endpoint(), 1).await,
      Err(SyncError::Persistence(_))
    ));
    let events = drain(&mut rx);
    assert!(!events.contains(&Event::DataChanged));
    assert!(matches!(
      events[..],
      [Event::Error {
        kind: ErrorKind::Persistence,
        ..
      }]
    ));
    assert_eq!(engine.state(), SyncState::Idle);
  }

  struct GatedTransport {
    started: Notify,
    gate: Notify,
  }

  #[async_trait]
  impl Transport for GatedTransport {
    async fn get(&self, _url: &Url) -> Result<Bytes, TransportError> {
      self.started.notify_one();
      self.gate.notified().await;
      Ok(Bytes::from_static(br#"{"results":[{"name":{"first":"ann"}}]}"#))
    }
  }

  #[tokio::test]
  async fn test_overlapping_sync_is_rejected() {
    let (notifier, _rx) = Notifier::channel();
    let transport = Arc::new(GatedTransport {
      started: Notify::new(),
      gate: Notify::new(),
    });
    let engine = Arc::new(ContactSyncEngine::new(
      transport.clone(),
      RecordingStore::default(),
      notifier,
    ));

    let first = tokio::spawn({
      let engine = engine.clone();
      async move { engine.sync(&endpoint(), 1).await }
    });
    transport.started.notified().await;
    assert_eq!(engine.state(), SyncState::Fetching);

    assert!(matches!(
      engine.sync(&endpoint(), 1).await,
      Err(SyncError::SyncInProgress)
    ));

    transport.gate.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), 1);
    assert_eq!(engine.state(), SyncState::Idle);
  }
}
