//! Shared helpers for the unit tests: a recording session I/O handle and
//! buffer/lineage builders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::buffer::{Buffer, OutputBufferMap};
use crate::lineage::{IndexInfo, Stream};
use crate::port::RecvTimeout;
use crate::session::{Session, SessionIo, SessionManager};
use crate::status::{BufferError, FlowError};

/// Session I/O stub that records everything the engine delivers.
#[derive(Default)]
pub struct RecordingIo {
  pub outputs: StdMutex<Vec<OutputBufferMap>>,
  pub last_errors: StdMutex<Vec<Option<BufferError>>>,
  pub ends: AtomicUsize,
  pub end_error: StdMutex<Option<BufferError>>,
}

impl RecordingIo {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Registers this stub as the session's I/O handle.
  pub fn attach(self: &Arc<Self>, session: &Session) {
    let handle: Arc<dyn SessionIo> = Arc::clone(self) as Arc<dyn SessionIo>;
    session.set_session_io(&handle);
  }

  pub fn output_count(&self) -> usize {
    self.outputs.lock().unwrap().len()
  }

  pub fn outputs(&self) -> Vec<OutputBufferMap> {
    self.outputs.lock().unwrap().clone()
  }

  pub fn end_count(&self) -> usize {
    self.ends.load(Ordering::SeqCst)
  }

  pub fn last_error(&self) -> Option<BufferError> {
    self.last_errors.lock().unwrap().last().cloned().flatten()
  }
}

#[async_trait]
impl SessionIo for RecordingIo {
  fn set_output_meta(&self, _port_name: &str, _meta: HashMap<String, String>) {}

  async fn send(&self, _port_name: &str, _payloads: Vec<Bytes>) -> Result<(), FlowError> {
    Ok(())
  }

  async fn recv(&self, _timeout: RecvTimeout) -> Result<OutputBufferMap, FlowError> {
    Ok(OutputBufferMap::new())
  }

  async fn close(&self) -> Result<(), FlowError> {
    Ok(())
  }

  async fn shutdown(&self) -> Result<(), FlowError> {
    Ok(())
  }

  fn push_graph_output(&self, output: OutputBufferMap) {
    self.outputs.lock().unwrap().push(output);
  }

  fn set_last_error(&self, error: Option<BufferError>) {
    self.last_errors.lock().unwrap().push(error);
  }

  fn session_end(&self, error: Option<BufferError>) {
    self.ends.fetch_add(1, Ordering::SeqCst);
    *self.end_error.lock().unwrap() = error;
  }
}

pub fn new_session() -> Arc<Session> {
  SessionManager::new().create_session()
}

pub fn data_buffer(stream: &Arc<Stream>, payload: &[u8]) -> Buffer {
  Buffer::new(
    Bytes::copy_from_slice(payload),
    IndexInfo::root(Arc::clone(stream)),
  )
}

pub fn end_buffer(stream: &Arc<Stream>) -> Buffer {
  Buffer::marker(IndexInfo::root_end_flag(Arc::clone(stream)))
}
