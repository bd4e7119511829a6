//! Static well-formedness checking of a declared graph.
//!
//! The checker runs once at build time, after parsing and before any
//! scheduling. It walks the graph in topological order carrying a
//! *hierarchy scope* per node: a stack of frames pushed by condition and
//! expand openers and popped at the condition's endif port or at a collapse.
//! Structural rules are enforced on the way:
//!
//! - multiple edges may converge on one input port only as the branches of
//!   exactly one condition (the endif), and every connected branch of that
//!   condition must arrive there;
//! - all input ports of a node must resolve to the same scope, and to the
//!   same condition branches, so the runtime can match their sub-streams;
//! - a collapse must find an expand frame on top of its scope;
//! - cycles are legal only through a loop-typed node, and the loop body may
//!   not exchange data with nodes outside the cycle;
//! - every condition must converge at exactly one endif port.
//!
//! The same walk assigns each node its *match node*: the upstream opener
//! whose sub-streams the node regroups at run time.
//!
//! The first violation wins; the checker returns a `BadConfig` naming the
//! offending nodes.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::warn;

use crate::flowunit::FlowunitRegistry;
use crate::graph::desc::{GraphDesc, NodeType};
use crate::status::FlowError;

/// Checker verdict: per-node match assignments plus, for every output
/// virtual node, whether its reaching sub-graph fully converged. An output
/// that did not converge is served by the unmatched-output node instead of
/// being rejected.
#[derive(Debug, Default)]
pub struct CheckReport {
  match_nodes: HashMap<String, Option<String>>,
  matched_outputs: HashMap<String, bool>,
}

impl CheckReport {
  /// The structural opener whose sub-stream `node` lives inside, if any.
  pub fn match_node(&self, node: &str) -> Option<&str> {
    self.match_nodes.get(node).and_then(|m| m.as_deref())
  }

  /// Whether the named output virtual node receives fully converged
  /// streams.
  pub fn output_matched(&self, node: &str) -> bool {
    self.matched_outputs.get(node).copied().unwrap_or(true)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
  Condition,
  Expand,
}

/// One level of the hierarchy stack: which opener introduced it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
  kind: FrameKind,
  opener: usize,
}

type Scope = Vec<Frame>;

/// Condition branches a stream descends from: condition node index to the
/// set of its output ports the stream may have taken.
type Branches = HashMap<usize, BTreeSet<String>>;

struct CheckNode {
  name: String,
  kind: NodeType,
  inputs: Vec<String>,
  outputs: Vec<String>,
  condition: bool,
  expand: bool,
  collapse: bool,
  looping: bool,
}

#[derive(Debug, Clone)]
struct CheckEdge {
  src: usize,
  src_port: String,
  dst: usize,
  dst_port: String,
}

pub struct GraphChecker<'a> {
  desc: &'a GraphDesc,
  registry: &'a FlowunitRegistry,
}

impl<'a> GraphChecker<'a> {
  pub fn new(desc: &'a GraphDesc, registry: &'a FlowunitRegistry) -> Self {
    Self { desc, registry }
  }

  pub fn check(&self) -> Result<CheckReport, FlowError> {
    let (nodes, edges) = self.resolve()?;
    let kept = validate_loops(&nodes, &edges)?;
    let order = topo_order(&nodes, &edges, &kept)?;
    propagate(&nodes, &edges, &kept, &order)
  }

  /// Resolves the description into check nodes with concrete port lists,
  /// synthesizing virtual node ports from the edges that touch them.
  fn resolve(&self) -> Result<(Vec<CheckNode>, Vec<CheckEdge>), FlowError> {
    let mut nodes = Vec::new();
    let mut by_name: HashMap<&str, usize> = HashMap::new();

    for (idx, node_desc) in self.desc.nodes.iter().enumerate() {
      if by_name.insert(node_desc.name.as_str(), idx).is_some() {
        return Err(reject(format!("node {} declared twice", node_desc.name)));
      }
      let node = match node_desc.node_type {
        NodeType::Input | NodeType::Output => CheckNode {
          name: node_desc.name.clone(),
          kind: node_desc.node_type,
          inputs: Vec::new(),
          outputs: Vec::new(),
          condition: false,
          expand: false,
          collapse: false,
          looping: false,
        },
        NodeType::Flowunit => {
          let Some(unit_name) = node_desc.flowunit.as_deref() else {
            return Err(reject(format!(
              "node {} has no flowunit attribute",
              node_desc.name
            )));
          };
          let Some(unit) = self.registry.get(unit_name) else {
            return Err(reject(format!(
              "node {} references unknown flowunit {}",
              node_desc.name, unit_name
            )));
          };
          CheckNode {
            name: node_desc.name.clone(),
            kind: NodeType::Flowunit,
            inputs: unit.inputs().to_vec(),
            outputs: unit.outputs().to_vec(),
            condition: unit.is_condition(),
            expand: unit.is_expand(),
            collapse: unit.is_collapse(),
            looping: unit.is_loop(),
          }
        }
      };
      nodes.push(node);
    }

    let mut edges = Vec::new();
    for edge in &self.desc.edges {
      let Some(&src) = by_name.get(edge.src_node.as_str()) else {
        return Err(reject(format!("edge references unknown node {}", edge.src_node)));
      };
      let Some(&dst) = by_name.get(edge.dst_node.as_str()) else {
        return Err(reject(format!("edge references unknown node {}", edge.dst_node)));
      };
      if nodes[src].kind == NodeType::Output {
        return Err(reject(format!(
          "output node {} cannot be an edge source",
          nodes[src].name
        )));
      }
      if nodes[dst].kind == NodeType::Input {
        return Err(reject(format!(
          "input node {} cannot be an edge target",
          nodes[dst].name
        )));
      }
      let src_port = edge
        .src_port
        .clone()
        .unwrap_or_else(|| nodes[src].name.clone());
      let dst_port = edge
        .dst_port
        .clone()
        .unwrap_or_else(|| nodes[dst].name.clone());

      match nodes[src].kind {
        NodeType::Input => {
          if !nodes[src].outputs.contains(&src_port) {
            nodes[src].outputs.push(src_port.clone());
          }
        }
        _ => {
          if !nodes[src].outputs.contains(&src_port) {
            return Err(reject(format!(
              "node {} has no output port {}",
              nodes[src].name, src_port
            )));
          }
        }
      }
      match nodes[dst].kind {
        NodeType::Output => {
          if !nodes[dst].inputs.contains(&dst_port) {
            nodes[dst].inputs.push(dst_port.clone());
          }
        }
        _ => {
          if !nodes[dst].inputs.contains(&dst_port) {
            return Err(reject(format!(
              "node {} has no input port {}",
              nodes[dst].name, dst_port
            )));
          }
        }
      }

      edges.push(CheckEdge {
        src,
        src_port,
        dst,
        dst_port,
      });
    }

    // every declared flowunit port must be wired
    for (idx, node) in nodes.iter().enumerate() {
      if node.kind != NodeType::Flowunit {
        continue;
      }
      for port in &node.inputs {
        if !edges.iter().any(|e| e.dst == idx && e.dst_port == *port) {
          return Err(reject(format!(
            "input port {} of node {} is not connected",
            port, node.name
          )));
        }
      }
      for port in &node.outputs {
        if !edges.iter().any(|e| e.src == idx && e.src_port == *port) {
          return Err(reject(format!(
            "output port {} of node {} is not connected",
            port, node.name
          )));
        }
      }
    }

    Ok((nodes, edges))
  }
}

fn reject(message: String) -> FlowError {
  warn!(%message, "graph check failed");
  FlowError::BadConfig(message)
}

/// Validates cycles and returns the edge indices that survive for the
/// acyclic walk (loopback edges into a loop node are excluded).
fn validate_loops(nodes: &[CheckNode], edges: &[CheckEdge]) -> Result<Vec<bool>, FlowError> {
  let adj: Vec<Vec<usize>> = {
    let mut adj = vec![Vec::new(); nodes.len()];
    for edge in edges {
      adj[edge.src].push(edge.dst);
    }
    adj
  };
  let sccs = tarjan_sccs(nodes.len(), &adj);

  let mut kept = vec![true; edges.len()];
  for scc in &sccs {
    let is_cycle =
      scc.len() > 1 || edges.iter().any(|e| e.src == scc[0] && e.dst == scc[0]);
    if !is_cycle {
      continue;
    }
    let members: HashSet<usize> = scc.iter().copied().collect();
    let loop_nodes: Vec<usize> = scc.iter().copied().filter(|&i| nodes[i].looping).collect();
    if loop_nodes.len() != 1 {
      return Err(reject(format!(
        "cycle through {} needs exactly one loop node",
        scc.iter().map(|&i| nodes[i].name.as_str()).collect::<Vec<_>>().join(", ")
      )));
    }
    let loop_node = loop_nodes[0];
    if nodes[loop_node].inputs.len() != 1 {
      return Err(reject(format!(
        "loop node {} must have exactly one input port",
        nodes[loop_node].name
      )));
    }
    // the loop body is self-contained: no edges across the cycle boundary
    for (idx, edge) in edges.iter().enumerate() {
      let src_in = members.contains(&edge.src);
      let dst_in = members.contains(&edge.dst);
      if src_in && edge.src != loop_node && !dst_in {
        return Err(reject(format!(
          "loop body node {} sends outside the loop to {}",
          nodes[edge.src].name, nodes[edge.dst].name
        )));
      }
      if dst_in && edge.dst != loop_node && !src_in {
        return Err(reject(format!(
          "node {} injects into the loop body at {}",
          nodes[edge.src].name, nodes[edge.dst].name
        )));
      }
      if src_in && dst_in && edge.dst == loop_node {
        kept[idx] = false;
      }
    }
  }
  Ok(kept)
}

fn tarjan_sccs(count: usize, adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
  fn visit(
    v: usize,
    adj: &[Vec<usize>],
    next: &mut usize,
    index: &mut [Option<usize>],
    low: &mut [usize],
    stack: &mut Vec<usize>,
    on_stack: &mut [bool],
    sccs: &mut Vec<Vec<usize>>,
  ) {
    index[v] = Some(*next);
    low[v] = *next;
    *next += 1;
    stack.push(v);
    on_stack[v] = true;
    for &w in &adj[v] {
      match index[w] {
        None => {
          visit(w, adj, next, index, low, stack, on_stack, sccs);
          low[v] = low[v].min(low[w]);
        }
        Some(w_index) => {
          if on_stack[w] {
            low[v] = low[v].min(w_index);
          }
        }
      }
    }
    if index[v] == Some(low[v]) {
      let mut scc = Vec::new();
      while let Some(w) = stack.pop() {
        on_stack[w] = false;
        scc.push(w);
        if w == v {
          break;
        }
      }
      sccs.push(scc);
    }
  }

  let mut next = 0;
  let mut index = vec![None; count];
  let mut low = vec![0; count];
  let mut stack = Vec::new();
  let mut on_stack = vec![false; count];
  let mut sccs = Vec::new();
  for v in 0..count {
    if index[v].is_none() {
      visit(
        v,
        adj,
        &mut next,
        &mut index,
        &mut low,
        &mut stack,
        &mut on_stack,
        &mut sccs,
      );
    }
  }
  sccs
}

fn topo_order(
  nodes: &[CheckNode],
  edges: &[CheckEdge],
  kept: &[bool],
) -> Result<Vec<usize>, FlowError> {
  let mut in_degree = vec![0usize; nodes.len()];
  for (idx, edge) in edges.iter().enumerate() {
    if kept[idx] {
      in_degree[edge.dst] += 1;
    }
  }
  let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
  let mut order = Vec::with_capacity(nodes.len());
  while let Some(node) = ready.pop() {
    order.push(node);
    for (idx, edge) in edges.iter().enumerate() {
      if kept[idx] && edge.src == node {
        in_degree[edge.dst] -= 1;
        if in_degree[edge.dst] == 0 {
          ready.push(edge.dst);
        }
      }
    }
  }
  if order.len() != nodes.len() {
    let stuck: Vec<&str> = (0..nodes.len())
      .filter(|&i| in_degree[i] > 0)
      .map(|i| nodes[i].name.as_str())
      .collect();
    return Err(reject(format!(
      "graph has a cycle without a loop node through {}",
      stuck.join(", ")
    )));
  }
  Ok(order)
}

/// The scope walk itself. Resolves every node's input scope, claims endif
/// ports, pops collapse frames, and records match nodes.
fn propagate(
  nodes: &[CheckNode],
  edges: &[CheckEdge],
  kept: &[bool],
  order: &[usize],
) -> Result<CheckReport, FlowError> {
  let mut out_scopes: Vec<Scope> = vec![Vec::new(); nodes.len()];
  let mut out_branches: Vec<Branches> = vec![Branches::new(); nodes.len()];
  let mut match_nodes: Vec<Option<usize>> = vec![None; nodes.len()];
  let mut matched_outputs: HashMap<String, bool> = HashMap::new();
  // condition node -> the (node, port) where its branches reconverge
  let mut endifs: HashMap<usize, (usize, String)> = HashMap::new();

  let connected_outputs: HashMap<usize, BTreeSet<String>> = {
    let mut map: HashMap<usize, BTreeSet<String>> = HashMap::new();
    for edge in edges {
      map.entry(edge.src).or_default().insert(edge.src_port.clone());
    }
    map
  };

  for &idx in order {
    let node = &nodes[idx];
    let in_edges: Vec<&CheckEdge> = edges
      .iter()
      .zip(kept)
      .filter(|(e, k)| **k && e.dst == idx)
      .map(|(e, _)| e)
      .collect();

    if in_edges.is_empty() {
      // sources and input virtual nodes live at the top level
      continue;
    }

    let mut port_scopes: Vec<(String, Scope, Branches)> = Vec::new();
    let mut closed_here: Vec<usize> = Vec::new();
    let mut mismatch = false;

    for port in &node.inputs {
      let port_edges: Vec<&CheckEdge> =
        in_edges.iter().copied().filter(|e| e.dst_port == *port).collect();
      if port_edges.is_empty() {
        continue;
      }

      let mut eff: Vec<(Scope, Branches)> = Vec::new();
      for edge in &port_edges {
        let mut scope = out_scopes[edge.src].clone();
        let mut branches = out_branches[edge.src].clone();
        if nodes[edge.src].condition {
          scope.push(Frame {
            kind: FrameKind::Condition,
            opener: edge.src,
          });
          branches
            .entry(edge.src)
            .or_default()
            .insert(edge.src_port.clone());
        } else if nodes[edge.src].expand {
          scope.push(Frame {
            kind: FrameKind::Expand,
            opener: edge.src,
          });
        }
        eff.push((scope, branches));
      }

      if eff.iter().any(|(scope, _)| *scope != eff[0].0) {
        if node.kind == NodeType::Output {
          mismatch = true;
          continue;
        }
        return Err(reject(format!(
          "port {} of node {} receives streams from different hierarchies",
          port, node.name
        )));
      }

      let mut scope = eff[0].0.clone();
      let mut branches = if port_edges.len() == 1 {
        eff[0].1.clone()
      } else {
        let mut merged = Branches::new();
        for (_, b) in &eff {
          for (cond, ports) in b {
            merged.entry(*cond).or_default().extend(ports.iter().cloned());
          }
        }
        merged
      };

      if port_edges.len() > 1 {
        let Some(top) = scope.last().cloned() else {
          if node.kind == NodeType::Output {
            mismatch = true;
            continue;
          }
          return Err(reject(format!(
            "multiple streams converge on port {} of node {} without a condition",
            port, node.name
          )));
        };
        if top.kind != FrameKind::Condition {
          if node.kind == NodeType::Output {
            mismatch = true;
            continue;
          }
          return Err(reject(format!(
            "multiple streams converge on port {} of node {} without a condition",
            port, node.name
          )));
        }
        let cond = top.opener;

        let covered = branches.get(&cond).cloned().unwrap_or_default();
        let expected = connected_outputs.get(&cond).cloned().unwrap_or_default();
        if covered != expected {
          return Err(reject(format!(
            "branches of condition {} only partially converge at {}:{}",
            nodes[cond].name, node.name, port
          )));
        }
        if let Some((other_node, other_port)) = endifs.get(&cond) {
          if *other_node != idx || other_port != port {
            return Err(reject(format!(
              "condition {} converges at more than one port",
              nodes[cond].name
            )));
          }
        }
        endifs.insert(cond, (idx, port.clone()));
        scope.pop();
        branches.remove(&cond);
        closed_here.push(cond);
      }

      port_scopes.push((port.clone(), scope, branches));
    }

    let Some((_, first_scope, first_branches)) = port_scopes.first() else {
      if node.kind == NodeType::Output {
        matched_outputs.insert(node.name.clone(), false);
      }
      continue;
    };
    let ports_agree = port_scopes
      .iter()
      .all(|(_, scope, branches)| scope == first_scope && branches == first_branches);
    if mismatch || !ports_agree {
      if node.kind == NodeType::Output {
        matched_outputs.insert(node.name.clone(), false);
        continue;
      }
      return Err(reject(format!(
        "input ports of node {} belong to different hierarchies",
        node.name
      )));
    }

    let in_scope = first_scope.clone();
    let in_branches = first_branches.clone();

    if node.kind == NodeType::Output {
      matched_outputs.insert(node.name.clone(), in_scope.is_empty());
    }

    let mut out_scope = in_scope.clone();
    let mut collapse_of = None;
    if node.collapse {
      match out_scope.last().cloned() {
        Some(frame) if frame.kind == FrameKind::Expand => {
          collapse_of = Some(frame.opener);
          out_scope.pop();
        }
        Some(_) => {
          return Err(reject(format!(
            "collapse node {} closes over an open condition",
            node.name
          )));
        }
        None => {
          return Err(reject(format!(
            "collapse node {} has no matching expand",
            node.name
          )));
        }
      }
    }

    match_nodes[idx] = if node.condition || node.expand {
      None
    } else if let Some(expand) = collapse_of {
      Some(expand)
    } else if let Some(&cond) = closed_here.first() {
      Some(cond)
    } else {
      in_scope.last().map(|frame| frame.opener)
    };

    out_scopes[idx] = out_scope;
    out_branches[idx] = in_branches;
  }

  // every condition must have reconverged somewhere
  for (idx, node) in nodes.iter().enumerate() {
    if node.condition && !endifs.contains_key(&idx) {
      return Err(reject(format!(
        "condition {} never converges",
        node.name
      )));
    }
  }

  let match_nodes = nodes
    .iter()
    .enumerate()
    .map(|(idx, node)| {
      (
        node.name.clone(),
        match_nodes[idx].map(|m| nodes[m].name.clone()),
      )
    })
    .collect();

  Ok(CheckReport {
    match_nodes,
    matched_outputs,
  })
}
