//! Transport double shared by the thumbnail tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use url::Url;

use crate::contacts::Transport;
use crate::error::TransportError;

/// Replays queued responses, then serves `body` forever.
///
/// A gated transport parks every request until [`ScriptedTransport::release`].
pub struct ScriptedTransport {
  responses: Mutex<VecDeque<Result<Bytes, TransportError>>>,
  body: Bytes,
  gate: Option<Semaphore>,
  calls: AtomicUsize,
  requested: Mutex<Vec<Url>>,
}

impl ScriptedTransport {
  fn build(
    responses: Vec<Result<Bytes, TransportError>>,
    body: &'static [u8],
    gated: bool,
  ) -> Arc<Self> {
    Arc::new(Self {
      responses: Mutex::new(responses.into()),
      body: Bytes::from_static(body),
      gate: gated.then(|| Semaphore::new(0)),
      calls: AtomicUsize::new(0),
      requested: Mutex::new(Vec::new()),
    })
  }

  pub fn ok(body: &'static [u8]) -> Arc<Self> {
    Self::build(Vec::new(), body, false)
  }

  pub fn gated(body: &'static [u8]) -> Arc<Self> {
    Self::build(Vec::new(), body, true)
  }

  pub fn with_responses(responses: Vec<Result<Bytes, TransportError>>) -> Arc<Self> {
    Self::build(responses, b"image", false)
  }

  pub fn gated_with_responses(responses: Vec<Result<Bytes, TransportError>>) -> Arc<Self> {
    Self::build(responses, b"image", true)
  }

  /// Let `n` parked requests proceed.
  pub fn release(&self, n: usize) {
    if let Some(gate) = &self.gate {
      gate.add_permits(n);
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn requested(&self) -> Vec<Url> {
    self.requested.lock().unwrap().clone()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn get(&self, url: &Url) -> Result<Bytes, TransportError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.requested.lock().unwrap().push(url.clone());

    if let Some(gate) = &self.gate {
      gate
        .acquire()
        .await
        .map_err(|e| TransportError(e.to_string()))?
        .forget();
    }

    let next = self.responses.lock().unwrap().pop_front();
    next.unwrap_or_else(|| Ok(self.body.clone()))
  }
}
