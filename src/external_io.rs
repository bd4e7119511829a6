//! The crate-provided session I/O handle.
//!
//! [`ExternalIoMap`] is the boundary between the external caller and the
//! virtual nodes: `send` stamps depth-0 lineage on the session's input
//! stream and pushes into the input virtual node's external ports; `close`
//! emits the stream terminators; `recv` pops the grouped output batches the
//! output virtual nodes deliver. The session holds this handle weakly, so
//! dropping it is observable engine-side as a failed upgrade.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tracing::debug;

use crate::buffer::{Buffer, OutputBufferMap};
use crate::lineage::{IndexInfo, Stream};
use crate::port::{InPort, RecvTimeout};
use crate::session::{Session, SessionIo};
use crate::status::{BufferError, FlowError};

pub struct ExternalIoMap {
  session: Arc<Session>,
  extern_ports: HashMap<String, Arc<InPort>>,
  input_stream: StdMutex<Option<Arc<Stream>>>,
  output_meta: StdMutex<HashMap<String, HashMap<String, String>>>,
  recv_queue: StdMutex<VecDeque<OutputBufferMap>>,
  recv_ready: Notify,
  last_error: StdMutex<Option<BufferError>>,
  closed: AtomicBool,
  ended: AtomicBool,
}

impl ExternalIoMap {
  /// Builds the handle and registers it as the session's I/O.
  pub fn new(session: Arc<Session>, extern_ports: Vec<Arc<InPort>>) -> Arc<Self> {
    let io = Arc::new(Self {
      session: Arc::clone(&session),
      extern_ports: extern_ports
        .into_iter()
        .map(|p| (p.name().to_string(), p))
        .collect(),
      input_stream: StdMutex::new(None),
      output_meta: StdMutex::new(HashMap::new()),
      recv_queue: StdMutex::new(VecDeque::new()),
      recv_ready: Notify::new(),
      last_error: StdMutex::new(None),
      closed: AtomicBool::new(false),
      ended: AtomicBool::new(false),
    });
    let handle: Arc<dyn SessionIo> = Arc::clone(&io) as Arc<dyn SessionIo>;
    session.set_session_io(&handle);
    io
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  /// The session's root input stream, created on first use. All ports share
  /// it so the output side can regroup per session at depth 0.
  fn input_stream(&self) -> Arc<Stream> {
    let mut slot = self.input_stream.lock().unwrap_or_else(|e| e.into_inner());
    match slot.as_ref() {
      Some(stream) => Arc::clone(stream),
      None => {
        let stream = Stream::new(Arc::clone(&self.session));
        *slot = Some(Arc::clone(&stream));
        stream
      }
    }
  }

  pub fn last_error(&self) -> Option<BufferError> {
    let slot = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
    slot.clone()
  }

  pub fn output_meta(&self, port_name: &str) -> Option<HashMap<String, String>> {
    let metas = self.output_meta.lock().unwrap_or_else(|e| e.into_inner());
    metas.get(port_name).cloned()
  }

  fn try_pop(&self) -> Option<OutputBufferMap> {
    let mut queue = self.recv_queue.lock().unwrap_or_else(|e| e.into_inner());
    queue.pop_front()
  }

  async fn recv_blocking(&self) -> OutputBufferMap {
    loop {
      if let Some(output) = self.try_pop() {
        return output;
      }
      if self.ended.load(Ordering::SeqCst) {
        return OutputBufferMap::new();
      }
      self.recv_ready.notified().await;
    }
  }
}

#[async_trait]
impl SessionIo for ExternalIoMap {
  fn set_output_meta(&self, port_name: &str, meta: HashMap<String, String>) {
    let mut metas = self.output_meta.lock().unwrap_or_else(|e| e.into_inner());
    metas.insert(port_name.to_string(), meta);
  }

  async fn send(&self, port_name: &str, payloads: Vec<Bytes>) -> Result<(), FlowError> {
    if self.session.is_abort() {
      return Err(FlowError::Aborted(self.session.id().to_string()));
    }
    if self.closed.load(Ordering::SeqCst) {
      return Err(FlowError::InvalidState(format!(
        "session {} is closed",
        self.session.id()
      )));
    }
    let Some(port) = self.extern_ports.get(port_name) else {
      return Err(FlowError::InvalidState(format!(
        "no input port named {port_name}"
      )));
    };

    let stream = self.input_stream();
    let batch: Vec<Buffer> = payloads
      .into_iter()
      .map(|payload| Buffer::new(payload, IndexInfo::root(Arc::clone(&stream))))
      .collect();
    self.session.ctx().count_in(batch.len() as u64);
    port.send(batch).await;
    Ok(())
  }

  async fn recv(&self, timeout: RecvTimeout) -> Result<OutputBufferMap, FlowError> {
    let output = match timeout {
      RecvTimeout::Poll => self.try_pop().unwrap_or_default(),
      RecvTimeout::Block => self.recv_blocking().await,
      RecvTimeout::Until(duration) => {
        match tokio::time::timeout(duration, self.recv_blocking()).await {
          Ok(output) => output,
          Err(_) => OutputBufferMap::new(),
        }
      }
    };
    Ok(output)
  }

  async fn close(&self) -> Result<(), FlowError> {
    if self.closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    self.session.close();
    let stream = self.input_stream();
    for port in self.extern_ports.values() {
      let end = Buffer::marker(IndexInfo::root_end_flag(Arc::clone(&stream)));
      port.send(vec![end]).await;
    }
    debug!(session = self.session.id(), "io handle closed");
    Ok(())
  }

  async fn shutdown(&self) -> Result<(), FlowError> {
    self.closed.store(true, Ordering::SeqCst);
    self.session.abort();
    self.recv_ready.notify_waiters();
    Ok(())
  }

  fn push_graph_output(&self, output: OutputBufferMap) {
    if self.session.is_abort() {
      return;
    }
    {
      let mut queue = self.recv_queue.lock().unwrap_or_else(|e| e.into_inner());
      queue.push_back(output);
    }
    self.recv_ready.notify_one();
  }

  fn set_last_error(&self, error: Option<BufferError>) {
    let mut slot = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
    *slot = error;
  }

  fn session_end(&self, error: Option<BufferError>) {
    if error.is_some() {
      let mut slot = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
      *slot = error;
    }
    self.ended.store(true, Ordering::SeqCst);
    self.recv_ready.notify_waiters();
    debug!(session = self.session.id(), "session end delivered");
  }
}
