//! Boundary nodes bridging the engine to its external caller.
//!
//! [`InputVirtualNode`] forwards caller-pushed buffers into the graph,
//! [`OutputVirtualNode`] delivers structurally matched outputs through the
//! session's I/O handle, and [`OutputUnmatchVirtualNode`] buffers outputs
//! whose sub-streams never reconverged, draining them per session through a
//! [`SessionUnmatchCache`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::buffer::{Buffer, OutputBufferMap};
use crate::config::Configuration;
use crate::device::{Device, DeviceManager};
use crate::match_stream::InputMatchStreamManager;
use crate::node::{NodeState, NodeUnit, RunKind};
use crate::port::{InPort, RecvTimeout};
use crate::session::Session;
use crate::status::{BufferError, DrainState, FlowError};

fn resolve_device(
  node: &str,
  device_mgr: Option<&Arc<DeviceManager>>,
  device_name: &str,
  device_id: &str,
) -> Option<Arc<dyn Device>> {
  let Some(mgr) = device_mgr else {
    error!(node = node, "device manager is not set");
    return None;
  };
  mgr.create_device(device_name, device_id)
}

/// Boundary node for caller-supplied input.
///
/// For each declared output port, `init` creates an external in-port the
/// caller pushes into; `run` is a pure forwarder and performs no lineage
/// synthesis. Lineage must already be set on every pushed buffer.
pub struct InputVirtualNode {
  state: NodeState,
  device_name: String,
  device_id: String,
  device_mgr: Option<Arc<DeviceManager>>,
  extern_ports: Vec<Arc<InPort>>,
}

impl InputVirtualNode {
  pub fn new(
    name: impl Into<String>,
    device_name: impl Into<String>,
    device_id: impl Into<String>,
    device_mgr: Option<Arc<DeviceManager>>,
  ) -> Self {
    Self {
      state: NodeState::new(name),
      device_name: device_name.into(),
      device_id: device_id.into(),
      device_mgr,
      extern_ports: Vec::new(),
    }
  }

  pub fn state(&self) -> &NodeState {
    &self.state
  }

  pub fn extern_ports(&self) -> &[Arc<InPort>] {
    &self.extern_ports
  }

  pub fn extern_port(&self, name: &str) -> Option<&Arc<InPort>> {
    self.extern_ports.iter().find(|p| p.name() == name)
  }
}

#[async_trait]
impl NodeUnit for InputVirtualNode {
  fn name(&self) -> &str {
    self.state.name()
  }

  fn init(
    &mut self,
    input_names: &[String],
    output_names: &[String],
    config: &Configuration,
  ) -> Result<(), FlowError> {
    self.state.init_ports(input_names, output_names, config)?;
    let extern_size = config.queue_capacity("queue_size_external", self.state.queue_size());
    self.extern_ports = output_names
      .iter()
      .map(|name| InPort::new(name.clone(), extern_size, self.state.priority()))
      .collect();
    Ok(())
  }

  async fn open(&self) -> Result<(), FlowError> {
    Ok(())
  }

  async fn run(&self, _kind: RunKind) -> Result<(), FlowError> {
    let mut cache: HashMap<String, Vec<Buffer>> = HashMap::new();
    for port in &self.extern_ports {
      let batch = cache.entry(port.name().to_string()).or_default();
      port.recv(batch, None, RecvTimeout::Poll).await;
    }
    for port in self.state.output_ports() {
      if let Some(batch) = cache.remove(port.name()) {
        if batch.is_empty() {
          continue;
        }
        port.send(batch).await;
      }
    }
    Ok(())
  }

  fn device(&self) -> Option<Arc<dyn Device>> {
    resolve_device(
      self.state.name(),
      self.device_mgr.as_ref(),
      &self.device_name,
      &self.device_id,
    )
  }
}

/// Boundary node delivering matched outputs to the caller.
///
/// The match manager runs with `gather_all` off and `in_order` on: outputs
/// of a sub-stream go out as one grouped push with the final error of the
/// group attached, at most one delivery per match stream.
pub struct OutputVirtualNode {
  state: NodeState,
  device_name: String,
  device_id: String,
  device_mgr: Option<Arc<DeviceManager>>,
  match_mgr: Mutex<Option<InputMatchStreamManager>>,
}

impl OutputVirtualNode {
  pub fn new(
    name: impl Into<String>,
    device_name: impl Into<String>,
    device_id: impl Into<String>,
    device_mgr: Option<Arc<DeviceManager>>,
  ) -> Self {
    Self {
      state: NodeState::new(name),
      device_name: device_name.into(),
      device_id: device_id.into(),
      device_mgr,
      match_mgr: Mutex::new(None),
    }
  }

  pub fn state(&self) -> &NodeState {
    &self.state
  }

  /// Pops queued buffers whose session I/O handle is already gone, so a
  /// caller that disconnected mid-flight cannot block the queue. Stops at
  /// the first head whose session still has a live handle.
  async fn erase_invalid_data(&self) {
    for port in self.state.input_ports() {
      let queue = port.queue();
      while let Some(buffer) = queue.front().await {
        if buffer.index().session().session_io().is_some() {
          break;
        }
        queue.pop().await;
      }
    }
  }
}

#[async_trait]
impl NodeUnit for OutputVirtualNode {
  fn name(&self) -> &str {
    self.state.name()
  }

  fn init(
    &mut self,
    input_names: &[String],
    output_names: &[String],
    config: &Configuration,
  ) -> Result<(), FlowError> {
    self.state.init_ports(input_names, output_names, config)?;
    let port_count = input_names.len().max(1);
    let mut mgr = InputMatchStreamManager::new(
      self.state.name().to_string(),
      self.state.queue_size(),
      port_count,
    );
    mgr.set_input_buffer_in_order(true);
    mgr.set_input_stream_gather_all(false);
    *self.match_mgr.get_mut() = Some(mgr);
    Ok(())
  }

  async fn open(&self) -> Result<(), FlowError> {
    Ok(())
  }

  async fn run(&self, _kind: RunKind) -> Result<(), FlowError> {
    self.erase_invalid_data().await;

    let mut mgr_slot = self.match_mgr.lock().await;
    let Some(mgr) = mgr_slot.as_mut() else {
      return Err(FlowError::InvalidState(format!(
        "output node {} is not initialized",
        self.state.name()
      )));
    };

    let match_list = match mgr.gen_match_stream_data(self.state.input_ports()).await {
      Ok(list) => list,
      Err(err) => {
        error!(node = self.state.name(), %err, "generate match stream failed");
        return Err(err);
      }
    };

    for match_data in &match_list {
      if match_data.data_count() == 0 {
        continue;
      }
      let session = match_data.session();
      if session.is_abort() {
        info!(session = session.id(), "session processed over");
        continue;
      }
      // a failed upgrade means the caller released the handle; drop silently
      let Some(io) = session.session_io() else {
        continue;
      };

      let mut output = OutputBufferMap::new();
      let mut last_error: Option<BufferError> = None;
      let mut delivered = 0u64;
      for (port_name, buffers) in match_data.port_buffers() {
        let mut valid = Vec::new();
        for buffer in buffers {
          if buffer.index().is_end_flag() || buffer.index().is_placeholder() {
            continue;
          }
          if let Some(err) = buffer.error() {
            last_error = Some(err.clone());
          }
          valid.push(buffer.clone());
        }
        delivered += valid.len() as u64;
        output.insert(port_name.clone(), valid);
      }
      session.ctx().count_out(delivered);
      io.push_graph_output(output);
      io.set_last_error(last_error);
    }

    for session in mgr.take_completed_sessions() {
      session.finish();
    }
    Ok(())
  }

  fn device(&self) -> Option<Arc<dyn Device>> {
    resolve_device(
      self.state.name(),
      self.device_mgr.as_ref(),
      &self.device_name,
      &self.device_id,
    )
  }
}

/// Per-session accumulator for outputs that never structurally matched.
///
/// Buffers are indexed per port, then per stream in insertion order. A port
/// is considered ended at the top level once a cached end-flag's root
/// ancestor is itself an end-flag.
pub struct SessionUnmatchCache {
  port_names: Vec<String>,
  port_streams: HashMap<String, Vec<(u64, Vec<Buffer>)>>,
  port_end_flags: HashMap<String, bool>,
  last_error: Option<BufferError>,
}

impl SessionUnmatchCache {
  pub fn new(port_names: Vec<String>) -> Self {
    let port_streams = port_names
      .iter()
      .map(|name| (name.clone(), Vec::new()))
      .collect();
    let port_end_flags = port_names.iter().map(|name| (name.clone(), false)).collect();
    Self {
      port_names,
      port_streams,
      port_end_flags,
      last_error: None,
    }
  }

  pub fn cache_buffer(&mut self, port_name: &str, buffer: Buffer) -> Result<(), FlowError> {
    if buffer.has_error() {
      self.last_error = buffer.error().cloned();
    }

    let index = Arc::clone(buffer.index());
    let Some(streams) = self.port_streams.get_mut(port_name) else {
      return Err(FlowError::InvalidState(format!(
        "unmatch cache has no port {port_name}"
      )));
    };
    let stream_id = index.stream().id();
    match streams.iter_mut().find(|(id, _)| *id == stream_id) {
      Some((_, buffers)) => buffers.push(buffer),
      None => streams.push((stream_id, vec![buffer])),
    }

    if !index.is_end_flag() {
      return Ok(());
    }
    if index.root_ancestor().is_end_flag() {
      self.port_end_flags.insert(port_name.to_string(), true);
    }
    Ok(())
  }

  pub fn last_error(&self) -> Option<BufferError> {
    self.last_error.clone()
  }

  /// Takes the oldest stream bucket of every port, strips end-flag and
  /// placeholder buffers, and emits the remainder under the port name.
  /// Returns [`DrainState::NoData`] when every port was empty at entry.
  pub fn pop_cache(&mut self, output: &mut OutputBufferMap) -> DrainState {
    let mut empty_ports = 0;
    for port_name in &self.port_names {
      let Some(streams) = self.port_streams.get_mut(port_name) else {
        continue;
      };
      if streams.is_empty() {
        output.insert(port_name.clone(), Vec::new());
        empty_ports += 1;
        continue;
      }
      let (_, buffers) = streams.remove(0);
      let valid: Vec<Buffer> = buffers
        .into_iter()
        .filter(|b| !b.index().is_end_flag() && !b.index().is_placeholder())
        .collect();
      output.insert(port_name.clone(), valid);
    }

    if empty_ports == self.port_names.len() {
      return DrainState::NoData;
    }
    DrainState::Continue
  }

  /// True once every port's stream ended at the top level.
  pub fn all_port_stream_end(&self) -> bool {
    self.port_end_flags.values().all(|ended| *ended)
  }
}

/// Boundary node for outputs whose sub-streams did not reconverge, e.g. a
/// sub-tree that produced data on one port and ended on another.
pub struct OutputUnmatchVirtualNode {
  state: NodeState,
  device_name: String,
  device_id: String,
  device_mgr: Option<Arc<DeviceManager>>,
  session_caches: Mutex<Vec<(Arc<Session>, SessionUnmatchCache)>>,
}

impl OutputUnmatchVirtualNode {
  pub fn new(
    name: impl Into<String>,
    device_name: impl Into<String>,
    device_id: impl Into<String>,
    device_mgr: Option<Arc<DeviceManager>>,
  ) -> Self {
    Self {
      state: NodeState::new(name),
      device_name: device_name.into(),
      device_id: device_id.into(),
      device_mgr,
      session_caches: Mutex::new(Vec::new()),
    }
  }

  pub fn state(&self) -> &NodeState {
    &self.state
  }
}

#[async_trait]
impl NodeUnit for OutputUnmatchVirtualNode {
  fn name(&self) -> &str {
    self.state.name()
  }

  fn init(
    &mut self,
    input_names: &[String],
    output_names: &[String],
    config: &Configuration,
  ) -> Result<(), FlowError> {
    self.state.init_ports(input_names, output_names, config)
  }

  async fn open(&self) -> Result<(), FlowError> {
    Ok(())
  }

  async fn run(&self, _kind: RunKind) -> Result<(), FlowError> {
    let mut caches = self.session_caches.lock().await;

    for port in self.state.input_ports() {
      let mut buffers = Vec::new();
      port.recv(&mut buffers, None, RecvTimeout::Poll).await;
      for buffer in buffers {
        let session = Arc::clone(buffer.index().session());
        if session.is_abort() {
          continue;
        }
        let slot = caches.iter().position(|(s, _)| s.id() == session.id());
        let slot = match slot {
          Some(slot) => slot,
          None => {
            caches.push((
              Arc::clone(&session),
              SessionUnmatchCache::new(self.state.input_names()),
            ));
            caches.len() - 1
          }
        };
        if let Some((_, cache)) = caches.get_mut(slot) {
          cache.cache_buffer(port.name(), buffer)?;
        }
      }
    }

    caches.retain_mut(|(session, cache)| {
      if let Some(io) = session.session_io() {
        io.set_last_error(cache.last_error());
        loop {
          let mut output = OutputBufferMap::new();
          if cache.pop_cache(&mut output) == DrainState::NoData {
            break;
          }
          io.push_graph_output(output);
        }
      }

      if cache.all_port_stream_end() || session.is_abort() {
        info!(session = session.id(), "session processed over");
        session.finish();
        return false;
      }
      true
    });
    Ok(())
  }

  fn device(&self) -> Option<Arc<dyn Device>> {
    resolve_device(
      self.state.name(),
      self.device_mgr.as_ref(),
      &self.device_name,
      &self.device_id,
    )
  }
}
