//! The unit of data flowing through the graph.
//!
//! A [`Buffer`] is an opaque payload plus per-key string metadata, an
//! optional processing error, and exactly one lineage tag. Buffers are cheap
//! to clone so out-ports can fan the same batch to several downstream queues.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::lineage::IndexInfo;
use crate::status::BufferError;

/// Grouped delivery unit handed to the external caller: output port name to
/// buffer list.
pub type OutputBufferMap = HashMap<String, Vec<Buffer>>;

#[derive(Debug, Clone)]
pub struct Buffer {
  payload: Bytes,
  meta: HashMap<String, String>,
  error: Option<BufferError>,
  index: Arc<IndexInfo>,
}

impl Buffer {
  pub fn new(payload: Bytes, index: Arc<IndexInfo>) -> Self {
    Self {
      payload,
      meta: HashMap::new(),
      error: None,
      index,
    }
  }

  /// An empty-payload buffer, used for end-flags and placeholders.
  pub fn marker(index: Arc<IndexInfo>) -> Self {
    Self::new(Bytes::new(), index)
  }

  pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.meta.insert(key.into(), value.into());
    self
  }

  pub fn with_error(mut self, error: BufferError) -> Self {
    self.error = Some(error);
    self
  }

  pub fn payload(&self) -> &Bytes {
    &self.payload
  }

  pub fn meta(&self, key: &str) -> Option<&str> {
    self.meta.get(key).map(String::as_str)
  }

  pub fn has_error(&self) -> bool {
    self.error.is_some()
  }

  pub fn error(&self) -> Option<&BufferError> {
    self.error.as_ref()
  }

  pub fn index(&self) -> &Arc<IndexInfo> {
    &self.index
  }
}
