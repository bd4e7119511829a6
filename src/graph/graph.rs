//! Graph build pipeline.
//!
//! `Graph::build` turns configuration into a runnable topology: parse the
//! graph text, run the static checker, instantiate the virtual boundary
//! nodes, create ports for the inner flowunit nodes, and wire every edge.
//! Flowunit bodies are not scheduled here; the worker pool drives them
//! through the port handles this structure exposes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Configuration;
use crate::device::DeviceManager;
use crate::external_io::ExternalIoMap;
use crate::flowunit::FlowunitRegistry;
use crate::graph::checker::GraphChecker;
use crate::graph::desc::{GraphDesc, NodeType};
use crate::graph::parse::parse_graph;
use crate::node::NodeUnit;
use crate::port::{InPort, OutPort};
use crate::session::SessionManager;
use crate::status::FlowError;
use crate::virtual_node::{InputVirtualNode, OutputUnmatchVirtualNode, OutputVirtualNode};

/// What a built node is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltNodeKind {
  InputVirtual,
  /// `matched` is false when the reaching sub-graph did not converge and
  /// the node is served by the unmatched-output path.
  OutputVirtual {
    matched: bool,
  },
  Flowunit,
}

/// One node of a built graph: its ports, kind, and match annotation.
pub struct GraphNode {
  name: String,
  kind: BuiltNodeKind,
  flowunit: Option<String>,
  match_node: Option<String>,
  in_ports: HashMap<String, Arc<InPort>>,
  out_ports: HashMap<String, Arc<OutPort>>,
}

impl GraphNode {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> BuiltNodeKind {
    self.kind
  }

  pub fn flowunit(&self) -> Option<&str> {
    self.flowunit.as_deref()
  }

  /// The upstream structural opener whose sub-stream this node lives in,
  /// assigned by the checker.
  pub fn match_node(&self) -> Option<&str> {
    self.match_node.as_deref()
  }

  pub fn in_port(&self, name: &str) -> Option<&Arc<InPort>> {
    self.in_ports.get(name)
  }

  pub fn out_port(&self, name: &str) -> Option<&Arc<OutPort>> {
    self.out_ports.get(name)
  }

  pub fn in_ports(&self) -> &HashMap<String, Arc<InPort>> {
    &self.in_ports
  }

  pub fn out_ports(&self) -> &HashMap<String, Arc<OutPort>> {
    &self.out_ports
  }
}

pub struct Graph {
  name: String,
  nodes: HashMap<String, GraphNode>,
  input_nodes: HashMap<String, Arc<InputVirtualNode>>,
  output_nodes: HashMap<String, Arc<OutputVirtualNode>>,
  unmatch_nodes: HashMap<String, Arc<OutputUnmatchVirtualNode>>,
  session_manager: Arc<SessionManager>,
}

impl Graph {
  /// Builds a graph from configuration: `graph.format` must be `graphviz`
  /// and `graph.graphconf` holds the graph text.
  pub fn build(config: &Configuration, registry: &FlowunitRegistry) -> Result<Self, FlowError> {
    let format = config.get_str_or("graph.format", "graphviz");
    if format != "graphviz" {
      return Err(FlowError::BadConfig(format!(
        "unsupported graph format {format}"
      )));
    }
    let Some(text) = config.get_str("graph.graphconf") else {
      return Err(FlowError::BadConfig("graph.graphconf is not set".to_string()));
    };
    let desc = parse_graph(text).map_err(|err| {
      warn!(%err, "graph text parse failed");
      FlowError::BadConfig(err.to_string())
    })?;
    Self::build_from_desc(&desc, registry, config)
  }

  pub fn build_from_desc(
    desc: &GraphDesc,
    registry: &FlowunitRegistry,
    config: &Configuration,
  ) -> Result<Self, FlowError> {
    let report = GraphChecker::new(desc, registry).check()?;
    let device_mgr = DeviceManager::new();

    // normalize edge endpoints: virtual node ports default to the node name
    let edges: Vec<(String, String, String, String)> = desc
      .edges
      .iter()
      .map(|e| {
        (
          e.src_node.clone(),
          e.src_port.clone().unwrap_or_else(|| e.src_node.clone()),
          e.dst_node.clone(),
          e.dst_port.clone().unwrap_or_else(|| e.dst_node.clone()),
        )
      })
      .collect();

    let mut nodes = HashMap::new();
    let mut input_nodes = HashMap::new();
    let mut output_nodes = HashMap::new();
    let mut unmatch_nodes = HashMap::new();

    for node_desc in &desc.nodes {
      let name = node_desc.name.clone();
      let device = node_desc.device.clone().unwrap_or_else(|| "cpu".to_string());
      let device_id = node_desc.device_id.clone().unwrap_or_else(|| "0".to_string());
      let match_node = report.match_node(&name).map(str::to_string);

      let node = match node_desc.node_type {
        NodeType::Input => {
          let out_names: Vec<String> = collect_ports(&edges, &name, true);
          let mut unit =
            InputVirtualNode::new(&name, &device, &device_id, Some(Arc::clone(&device_mgr)));
          unit.init(&[], &out_names, config)?;
          let out_ports = unit
            .state()
            .output_ports()
            .iter()
            .map(|p| (p.name().to_string(), Arc::clone(p)))
            .collect();
          input_nodes.insert(name.clone(), Arc::new(unit));
          GraphNode {
            name: name.clone(),
            kind: BuiltNodeKind::InputVirtual,
            flowunit: None,
            match_node,
            in_ports: HashMap::new(),
            out_ports,
          }
        }
        NodeType::Output => {
          let in_names: Vec<String> = collect_ports(&edges, &name, false);
          let matched = report.output_matched(&name);
          let in_ports;
          if matched {
            let mut unit =
              OutputVirtualNode::new(&name, &device, &device_id, Some(Arc::clone(&device_mgr)));
            unit.init(&in_names, &[], config)?;
            in_ports = port_map(unit.state().input_ports());
            output_nodes.insert(name.clone(), Arc::new(unit));
          } else {
            info!(node = %name, "output streams do not converge, using unmatched delivery");
            let mut unit = OutputUnmatchVirtualNode::new(
              &name,
              &device,
              &device_id,
              Some(Arc::clone(&device_mgr)),
            );
            unit.init(&in_names, &[], config)?;
            in_ports = port_map(unit.state().input_ports());
            unmatch_nodes.insert(name.clone(), Arc::new(unit));
          }
          GraphNode {
            name: name.clone(),
            kind: BuiltNodeKind::OutputVirtual { matched },
            flowunit: None,
            match_node,
            in_ports,
            out_ports: HashMap::new(),
          }
        }
        NodeType::Flowunit => {
          // existence was validated by the checker
          let Some(unit) = node_desc.flowunit.as_deref().and_then(|u| registry.get(u)) else {
            return Err(FlowError::BadConfig(format!(
              "node {name} references an unknown flowunit"
            )));
          };
          let capacity = config.queue_capacity("queue_size", None);
          let in_ports = unit
            .inputs()
            .iter()
            .map(|p| (p.clone(), InPort::new(p.clone(), capacity, 0)))
            .collect();
          let out_ports = unit
            .outputs()
            .iter()
            .map(|p| (p.clone(), OutPort::new(p.clone())))
            .collect();
          GraphNode {
            name: name.clone(),
            kind: BuiltNodeKind::Flowunit,
            flowunit: node_desc.flowunit.clone(),
            match_node,
            in_ports,
            out_ports,
          }
        }
      };
      nodes.insert(name, node);
    }

    for (src, src_port, dst, dst_port) in &edges {
      let Some(target) = nodes.get(dst).and_then(|n| n.in_port(dst_port)) else {
        return Err(FlowError::BadConfig(format!(
          "edge target {dst}:{dst_port} does not exist"
        )));
      };
      let target = Arc::clone(target);
      let Some(out_port) = nodes.get(src).and_then(|n| n.out_port(src_port)) else {
        return Err(FlowError::BadConfig(format!(
          "edge source {src}:{src_port} does not exist"
        )));
      };
      out_port.connect(target);
    }

    Ok(Self {
      name: desc.name.clone(),
      nodes,
      input_nodes,
      output_nodes,
      unmatch_nodes,
      session_manager: SessionManager::new(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn node(&self, name: &str) -> Option<&GraphNode> {
    self.nodes.get(name)
  }

  pub fn input_node(&self, name: &str) -> Option<&Arc<InputVirtualNode>> {
    self.input_nodes.get(name)
  }

  pub fn output_node(&self, name: &str) -> Option<&Arc<OutputVirtualNode>> {
    self.output_nodes.get(name)
  }

  pub fn unmatch_output_node(&self, name: &str) -> Option<&Arc<OutputUnmatchVirtualNode>> {
    self.unmatch_nodes.get(name)
  }

  pub fn session_manager(&self) -> &Arc<SessionManager> {
    &self.session_manager
  }

  /// Opens a session against this graph: creates it in the session manager
  /// and binds an I/O handle to the named input virtual node's external
  /// ports.
  pub fn open_session(&self, input_node: &str) -> Result<Arc<ExternalIoMap>, FlowError> {
    let Some(input) = self.input_nodes.get(input_node) else {
      return Err(FlowError::InvalidState(format!(
        "graph has no input node {input_node}"
      )));
    };
    let session = self.session_manager.create_session();
    Ok(ExternalIoMap::new(session, input.extern_ports().to_vec()))
  }
}

fn collect_ports(
  edges: &[(String, String, String, String)],
  node: &str,
  as_source: bool,
) -> Vec<String> {
  let mut names: Vec<String> = Vec::new();
  for (src, src_port, dst, dst_port) in edges {
    let port = if as_source {
      if src != node {
        continue;
      }
      src_port
    } else {
      if dst != node {
        continue;
      }
      dst_port
    };
    if !names.contains(port) {
      names.push(port.clone());
    }
  }
  names
}

fn port_map(ports: &[Arc<InPort>]) -> HashMap<String, Arc<InPort>> {
  ports
    .iter()
    .map(|p| (p.name().to_string(), Arc::clone(p)))
    .collect()
}
