//! Flowunit metadata.
//!
//! The engine never runs a flowunit body itself; it only needs each unit's
//! structural description: port names, flow type, and whether the unit is a
//! condition, expand, collapse, or loop. The static checker resolves node
//! declarations against a [`FlowunitRegistry`] of these descriptors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
  Normal,
  Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
  None,
  IfElse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputType {
  Normal,
  Expand,
  Collapse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopType {
  None,
  Loop,
}

/// Structural description of one flowunit kind.
#[derive(Debug, Clone)]
pub struct FlowunitDesc {
  name: String,
  inputs: Vec<String>,
  outputs: Vec<String>,
  flow_type: FlowType,
  condition_type: ConditionType,
  output_type: OutputType,
  loop_type: LoopType,
  stream_same_count: bool,
}

impl FlowunitDesc {
  pub fn new(name: impl Into<String>, inputs: Vec<String>, outputs: Vec<String>) -> Self {
    Self {
      name: name.into(),
      inputs,
      outputs,
      flow_type: FlowType::Normal,
      condition_type: ConditionType::None,
      output_type: OutputType::Normal,
      loop_type: LoopType::None,
      stream_same_count: false,
    }
  }

  pub fn with_flow_type(mut self, flow_type: FlowType) -> Self {
    self.flow_type = flow_type;
    self
  }

  pub fn with_condition_type(mut self, condition_type: ConditionType) -> Self {
    self.condition_type = condition_type;
    self
  }

  pub fn with_output_type(mut self, output_type: OutputType) -> Self {
    self.output_type = output_type;
    self
  }

  pub fn with_loop_type(mut self, loop_type: LoopType) -> Self {
    self.loop_type = loop_type;
    self
  }

  pub fn with_stream_same_count(mut self, same: bool) -> Self {
    self.stream_same_count = same;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn inputs(&self) -> &[String] {
    &self.inputs
  }

  pub fn outputs(&self) -> &[String] {
    &self.outputs
  }

  pub fn flow_type(&self) -> FlowType {
    self.flow_type
  }

  pub fn condition_type(&self) -> ConditionType {
    self.condition_type
  }

  pub fn output_type(&self) -> OutputType {
    self.output_type
  }

  pub fn loop_type(&self) -> LoopType {
    self.loop_type
  }

  pub fn stream_same_count(&self) -> bool {
    self.stream_same_count
  }

  pub fn is_condition(&self) -> bool {
    self.condition_type == ConditionType::IfElse
  }

  pub fn is_expand(&self) -> bool {
    self.output_type == OutputType::Expand
  }

  pub fn is_collapse(&self) -> bool {
    self.output_type == OutputType::Collapse
  }

  pub fn is_loop(&self) -> bool {
    self.loop_type == LoopType::Loop
  }
}

/// Descriptor lookup used by the build pipeline. Filling it is the plugin
/// loader's job; tests register mock descriptors directly.
#[derive(Debug, Default)]
pub struct FlowunitRegistry {
  units: HashMap<String, FlowunitDesc>,
}

impl FlowunitRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, desc: FlowunitDesc) {
    self.units.insert(desc.name().to_string(), desc);
  }

  pub fn get(&self, name: &str) -> Option<&FlowunitDesc> {
    self.units.get(name)
  }
}
