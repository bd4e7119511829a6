//! Sub-stream matching across a node's input ports.
//!
//! The [`InputMatchStreamManager`] is a per-node receiver. Arriving buffers
//! are grouped by the stream of their ancestor at the node's match depth, so
//! buffers that diverged through branches or expands upstream are reassembled
//! into one [`MatchStreamData`] per sub-stream. Groups are emitted in
//! ancestor-arrival order; a buffer arriving for a sub-stream that already
//! ended is malformed lineage.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::error;

use crate::buffer::Buffer;
use crate::port::{InPort, RecvTimeout};
use crate::session::Session;
use crate::status::FlowError;

/// One matched group: for each input port, the buffers of a single
/// sub-stream, in per-port arrival order.
#[derive(Debug)]
pub struct MatchStreamData {
  session: Arc<Session>,
  port_buffers: Vec<(String, Vec<Buffer>)>,
}

impl MatchStreamData {
  pub fn new(session: Arc<Session>, port_buffers: Vec<(String, Vec<Buffer>)>) -> Self {
    Self {
      session,
      port_buffers,
    }
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  pub fn port_buffers(&self) -> &[(String, Vec<Buffer>)] {
    &self.port_buffers
  }

  pub fn data_count(&self) -> usize {
    self.port_buffers.iter().map(|(_, b)| b.len()).sum()
  }
}

struct MatchBucket {
  session: Arc<Session>,
  ports: HashMap<String, Vec<Buffer>>,
  ended_ports: HashSet<String>,
}

impl MatchBucket {
  fn new(session: Arc<Session>) -> Self {
    Self {
      session,
      ports: HashMap::new(),
      ended_ports: HashSet::new(),
    }
  }
}

/// Per-node receiver that groups arriving buffers into match stream data.
pub struct InputMatchStreamManager {
  name: String,
  queue_size: Option<usize>,
  port_count: usize,
  in_order: bool,
  gather_all: bool,
  match_depth: usize,
  order: Vec<u64>,
  buckets: HashMap<u64, MatchBucket>,
  ended_streams: HashSet<u64>,
  completed_sessions: Vec<Arc<Session>>,
}

impl InputMatchStreamManager {
  pub fn new(name: impl Into<String>, queue_size: Option<usize>, port_count: usize) -> Self {
    Self {
      name: name.into(),
      queue_size,
      port_count,
      in_order: false,
      gather_all: true,
      match_depth: 0,
      order: Vec::new(),
      buckets: HashMap::new(),
      ended_streams: HashSet::new(),
      completed_sessions: Vec::new(),
    }
  }

  /// Require per-port arrival order inside each emitted group. Buffers are
  /// accumulated in arrival order either way; the flag records the caller's
  /// ordering contract.
  pub fn set_input_buffer_in_order(&mut self, in_order: bool) {
    self.in_order = in_order;
  }

  /// When set, a group is emitted only once every input port contributed a
  /// buffer or its end-flag. When cleared, partial groups are emitted as
  /// soon as progress is possible.
  pub fn set_input_stream_gather_all(&mut self, gather_all: bool) {
    self.gather_all = gather_all;
  }

  /// Lineage depth this node matches at. Depth 0 (the default) matches by
  /// root ancestor; a node inside an expand matches one level down.
  pub fn set_match_depth(&mut self, depth: usize) {
    self.match_depth = depth;
  }

  pub fn in_order(&self) -> bool {
    self.in_order
  }

  pub fn gather_all(&self) -> bool {
    self.gather_all
  }

  pub fn port_count(&self) -> usize {
    self.port_count
  }

  /// Consumes available buffers from `ports` and returns the groups that
  /// are ready under the gathering mode, in ancestor-arrival order.
  pub async fn gen_match_stream_data(
    &mut self,
    ports: &[Arc<InPort>],
  ) -> Result<Vec<MatchStreamData>, FlowError> {
    for port in ports {
      let mut drained = Vec::new();
      port.recv(&mut drained, self.queue_size, RecvTimeout::Poll).await;
      for buffer in drained {
        self.route(port.name(), buffer)?;
      }
    }
    Ok(self.collect(ports))
  }

  fn route(&mut self, port_name: &str, buffer: Buffer) -> Result<(), FlowError> {
    let ancestor = buffer
      .index()
      .ancestor_at_depth(self.match_depth)
      .ok_or_else(|| {
        error!(node = %self.name, port = port_name, "buffer above match depth");
        FlowError::InvalidState(format!(
          "node {}: buffer on port {} has no ancestor at depth {}",
          self.name, port_name, self.match_depth
        ))
      })?;
    let key = ancestor.stream().id();
    if self.ended_streams.contains(&key) {
      error!(node = %self.name, port = port_name, stream = key, "buffer after stream end");
      return Err(FlowError::InvalidState(format!(
        "node {}: buffer on port {} for ended stream {}",
        self.name, port_name, key
      )));
    }

    let bucket = match self.buckets.entry(key) {
      Entry::Occupied(entry) => entry.into_mut(),
      Entry::Vacant(entry) => {
        self.order.push(key);
        entry.insert(MatchBucket::new(Arc::clone(ancestor.stream().session())))
      }
    };
    if bucket.ended_ports.contains(port_name) {
      return Err(FlowError::InvalidState(format!(
        "node {}: buffer on port {} after end flag of stream {}",
        self.name, port_name, key
      )));
    }
    if buffer.index().is_end_flag() && buffer.index().depth() == self.match_depth {
      bucket.ended_ports.insert(port_name.to_string());
    }
    bucket
      .ports
      .entry(port_name.to_string())
      .or_default()
      .push(buffer);
    Ok(())
  }

  fn collect(&mut self, ports: &[Arc<InPort>]) -> Vec<MatchStreamData> {
    let port_names: Vec<&str> = ports.iter().map(|p| p.name()).collect();
    let mut out = Vec::new();
    let mut finished = Vec::new();

    for key in &self.order {
      let Some(bucket) = self.buckets.get_mut(key) else {
        continue;
      };
      let ready = if self.gather_all {
        port_names.iter().all(|name| {
          bucket.ended_ports.contains(*name)
            || bucket.ports.get(*name).is_some_and(|b| !b.is_empty())
        })
      } else {
        bucket.ports.values().any(|b| !b.is_empty())
      };
      if ready {
        let mut port_buffers = Vec::new();
        for name in &port_names {
          if let Some(buffers) = bucket.ports.get_mut(*name) {
            if !buffers.is_empty() {
              port_buffers.push(((*name).to_string(), std::mem::take(buffers)));
            }
          }
        }
        if !port_buffers.is_empty() {
          out.push(MatchStreamData::new(Arc::clone(&bucket.session), port_buffers));
        }
      }
      let complete = port_names.iter().all(|name| bucket.ended_ports.contains(*name))
        && bucket.ports.values().all(|b| b.is_empty());
      if complete {
        finished.push(*key);
      }
    }

    for key in finished {
      if let Some(bucket) = self.buckets.remove(&key) {
        self.ended_streams.insert(key);
        if self.match_depth == 0 {
          self.completed_sessions.push(bucket.session);
        }
      }
    }
    self.order.retain(|key| self.buckets.contains_key(key));
    out
  }

  /// Sessions whose root stream completed (all ports saw the end-flag)
  /// since the last call. Only populated when matching at depth 0.
  pub fn take_completed_sessions(&mut self) -> Vec<Arc<Session>> {
    std::mem::take(&mut self.completed_sessions)
  }
}
