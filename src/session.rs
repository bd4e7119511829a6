//! Per-caller session lifecycle.
//!
//! A [`Session`] is one external caller's invocation of the graph. It owns
//! the streams it induces, carries atomic `closed`/`abort` flags, and holds a
//! weak reference to the caller's I/O handle; the caller owns the strong one,
//! so a released handle is observable as a failed upgrade. The
//! [`SessionManager`] keeps a weak registry so sessions released by their
//! owners are reaped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::buffer::OutputBufferMap;
use crate::port::RecvTimeout;
use crate::status::{BufferError, FlowError};

/// Caller-facing and engine-facing contract of a session I/O handle.
///
/// `set_output_meta`, `send`, `recv`, `close`, and `shutdown` are used by the
/// external caller; `push_graph_output`, `set_last_error`, and `session_end`
/// are invoked by the virtual nodes at delivery time.
#[async_trait]
pub trait SessionIo: Send + Sync {
  /// Attaches metadata for outputs delivered on `port_name`.
  fn set_output_meta(&self, port_name: &str, meta: HashMap<String, String>);

  /// Pushes payloads into the graph on the named input port. The handle
  /// stamps depth-0 lineage before the buffers enter the engine.
  async fn send(&self, port_name: &str, payloads: Vec<Bytes>) -> Result<(), FlowError>;

  /// Pops one grouped output delivery. Returns an empty map on timeout
  /// expiry or after the session has ended.
  async fn recv(&self, timeout: RecvTimeout) -> Result<OutputBufferMap, FlowError>;

  /// Graceful end: no further `send` is allowed, in-flight buffers drain.
  async fn close(&self) -> Result<(), FlowError>;

  /// Abortive close: stop delivering outputs immediately.
  async fn shutdown(&self) -> Result<(), FlowError>;

  /// Engine-facing: deliver one grouped output push.
  fn push_graph_output(&self, output: OutputBufferMap);

  /// Engine-facing: record the final error of the last delivered group.
  fn set_last_error(&self, error: Option<BufferError>);

  /// Engine-facing: terminal callback on session teardown. Delivered at
  /// most once per session.
  fn session_end(&self, error: Option<BufferError>);
}

/// Session identity and counters.
#[derive(Debug)]
pub struct SessionContext {
  id: String,
  buffers_in: AtomicU64,
  buffers_out: AtomicU64,
}

impl SessionContext {
  fn new(id: String) -> Self {
    Self {
      id,
      buffers_in: AtomicU64::new(0),
      buffers_out: AtomicU64::new(0),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn count_in(&self, n: u64) {
    self.buffers_in.fetch_add(n, Ordering::Relaxed);
  }

  pub fn count_out(&self, n: u64) {
    self.buffers_out.fetch_add(n, Ordering::Relaxed);
  }

  pub fn buffers_in(&self) -> u64 {
    self.buffers_in.load(Ordering::Relaxed)
  }

  pub fn buffers_out(&self) -> u64 {
    self.buffers_out.load(Ordering::Relaxed)
  }
}

pub struct Session {
  ctx: Arc<SessionContext>,
  io: Mutex<Option<Weak<dyn SessionIo>>>,
  closed: AtomicBool,
  abort: AtomicBool,
  ended: AtomicBool,
  error: Mutex<Option<BufferError>>,
}

impl Session {
  fn new(id: String) -> Arc<Self> {
    Arc::new(Self {
      ctx: Arc::new(SessionContext::new(id)),
      io: Mutex::new(None),
      closed: AtomicBool::new(false),
      abort: AtomicBool::new(false),
      ended: AtomicBool::new(false),
      error: Mutex::new(None),
    })
  }

  pub fn ctx(&self) -> &Arc<SessionContext> {
    &self.ctx
  }

  pub fn id(&self) -> &str {
    self.ctx.id()
  }

  pub fn set_session_io(&self, io: &Arc<dyn SessionIo>) {
    let mut slot = self.io.lock().unwrap_or_else(|e| e.into_inner());
    *slot = Some(Arc::downgrade(io));
  }

  /// Upgrades the weak I/O handle. `None` once the caller released it.
  pub fn session_io(&self) -> Option<Arc<dyn SessionIo>> {
    let slot = self.io.lock().unwrap_or_else(|e| e.into_inner());
    slot.as_ref().and_then(Weak::upgrade)
  }

  /// Graceful close: buffers already in the engine complete. Idempotent.
  pub fn close(&self) {
    if !self.closed.swap(true, Ordering::SeqCst) {
      debug!(session = self.id(), "session closed");
    }
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  /// Stop delivering outputs immediately. In-flight buffers keep draining
  /// but are not surfaced. Does not un-close a closed session.
  pub fn abort(&self) {
    if !self.abort.swap(true, Ordering::SeqCst) {
      info!(session = self.id(), "session aborted");
    }
  }

  pub fn is_abort(&self) -> bool {
    self.abort.load(Ordering::SeqCst)
  }

  pub fn set_error(&self, error: BufferError) {
    let mut slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
    *slot = Some(error);
  }

  pub fn last_error(&self) -> Option<BufferError> {
    let slot = self.error.lock().unwrap_or_else(|e| e.into_inner());
    slot.clone()
  }

  /// Terminal transition: notifies the caller's I/O handle once, with the
  /// session's last recorded error. Safe to call repeatedly.
  pub fn finish(&self) {
    if self.ended.swap(true, Ordering::SeqCst) {
      return;
    }
    self.close();
    if let Some(io) = self.session_io() {
      io.session_end(self.last_error());
    }
  }

  pub fn is_ended(&self) -> bool {
    self.ended.load(Ordering::SeqCst)
  }
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
      .field("id", &self.id())
      .field("closed", &self.is_closed())
      .field("abort", &self.is_abort())
      .finish()
  }
}

/// Process-wide session registry holding weak references.
#[derive(Default)]
pub struct SessionManager {
  sessions: Mutex<HashMap<String, Weak<Session>>>,
  next_id: AtomicU64,
}

impl SessionManager {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn create_session(&self) -> Arc<Session> {
    let id = format!("session-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
    let session = Session::new(id.clone());
    let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
    map.insert(id, Arc::downgrade(&session));
    session
  }

  pub fn delete_session(&self, id: &str) {
    let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
    map.remove(id);
  }

  /// Live sessions only; expired weak entries are pruned on the way out.
  pub fn sessions(&self) -> HashMap<String, Arc<Session>> {
    let mut map = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
    map.retain(|_, weak| weak.strong_count() > 0);
    map
      .iter()
      .filter_map(|(id, weak)| weak.upgrade().map(|s| (id.clone(), s)))
      .collect()
  }
}
