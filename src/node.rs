//! Node capability set and shared node state.
//!
//! Nodes are modeled as a flat capability trait over a tagged set of kinds
//! rather than an inheritance tree; structural behavior lives in the static
//! checker's tables, not in overridable methods.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Configuration;
use crate::device::Device;
use crate::port::{InPort, OutPort};
use crate::status::FlowError;

/// Why the scheduler invoked `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
  Data,
  Event,
}

/// Capability set shared by every schedulable node.
#[async_trait]
pub trait NodeUnit: Send + Sync {
  fn name(&self) -> &str;

  /// Builds the node's ports from the declared names. Fails on duplicate
  /// port names.
  fn init(
    &mut self,
    input_names: &[String],
    output_names: &[String],
    config: &Configuration,
  ) -> Result<(), FlowError>;

  async fn open(&self) -> Result<(), FlowError>;

  async fn run(&self, kind: RunKind) -> Result<(), FlowError>;

  fn device(&self) -> Option<Arc<dyn Device>>;
}

/// Port set, priority, and queue sizing common to all node kinds.
pub struct NodeState {
  name: String,
  priority: u32,
  queue_size: Option<usize>,
  input_ports: Vec<Arc<InPort>>,
  output_ports: Vec<Arc<OutPort>>,
}

impl NodeState {
  /// Unbounded queues and priority 0 until `init_ports` applies the
  /// configuration.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      priority: 0,
      queue_size: None,
      input_ports: Vec::new(),
      output_ports: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn priority(&self) -> u32 {
    self.priority
  }

  pub fn set_priority(&mut self, priority: u32) {
    self.priority = priority;
  }

  pub fn queue_size(&self) -> Option<usize> {
    self.queue_size
  }

  pub fn set_queue_size(&mut self, queue_size: Option<usize>) {
    self.queue_size = queue_size;
  }

  pub fn init_ports(
    &mut self,
    input_names: &[String],
    output_names: &[String],
    config: &Configuration,
  ) -> Result<(), FlowError> {
    self.queue_size = config.queue_capacity("queue_size", self.queue_size);
    self.input_ports.clear();
    self.output_ports.clear();
    for name in input_names {
      if self.input_port(name).is_some() {
        return Err(FlowError::BadConfig(format!(
          "node {} declares input port {} twice",
          self.name, name
        )));
      }
      self
        .input_ports
        .push(InPort::new(name.clone(), self.queue_size, self.priority));
    }
    for name in output_names {
      if self.output_port(name).is_some() {
        return Err(FlowError::BadConfig(format!(
          "node {} declares output port {} twice",
          self.name, name
        )));
      }
      self.output_ports.push(OutPort::new(name.clone()));
    }
    Ok(())
  }

  pub fn input_ports(&self) -> &[Arc<InPort>] {
    &self.input_ports
  }

  pub fn output_ports(&self) -> &[Arc<OutPort>] {
    &self.output_ports
  }

  pub fn input_port(&self, name: &str) -> Option<&Arc<InPort>> {
    self.input_ports.iter().find(|p| p.name() == name)
  }

  pub fn output_port(&self, name: &str) -> Option<&Arc<OutPort>> {
    self.output_ports.iter().find(|p| p.name() == name)
  }

  pub fn input_names(&self) -> Vec<String> {
    self.input_ports.iter().map(|p| p.name().to_string()).collect()
  }
}
