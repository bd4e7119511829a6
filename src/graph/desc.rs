//! Parsed graph description.
//!
//! The neutral form between the text parser and the build pipeline: a node
//! list with declared types and a typed edge list. Ports omitted on virtual
//! node endpoints stay `None` here; the build pipeline fills in defaults.

/// Declared role of a node in the graph text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
  /// Maps to an input virtual node.
  Input,
  /// Maps to an output virtual node.
  Output,
  /// A flowunit instance resolved through the registry.
  Flowunit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDesc {
  pub name: String,
  pub node_type: NodeType,
  pub flowunit: Option<String>,
  pub device: Option<String>,
  pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDesc {
  pub src_node: String,
  pub src_port: Option<String>,
  pub dst_node: String,
  pub dst_port: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphDesc {
  pub name: String,
  pub nodes: Vec<NodeDesc>,
  pub edges: Vec<EdgeDesc>,
}

impl GraphDesc {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      nodes: Vec::new(),
      edges: Vec::new(),
    }
  }

  pub fn node(&self, name: &str) -> Option<&NodeDesc> {
    self.nodes.iter().find(|n| n.name == name)
  }

  pub fn add_node(&mut self, node: NodeDesc) {
    self.nodes.push(node);
  }

  pub fn add_edge(&mut self, edge: EdgeDesc) {
    self.edges.push(edge);
  }
}
