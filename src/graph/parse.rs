//! Parse graphviz-style graph text into a [`GraphDesc`].
//!
//! The accepted dialect is a directed multigraph:
//!
//! ```text
//! digraph demo {
//!   input1[type=input]
//!   b[type=flowunit, flowunit=test_1_1, device=cpu, deviceid=0]
//!   output1[type=output]
//!   input1 -> b:In_1
//!   b:Out_1 -> output1
//! }
//! ```
//!
//! Statements are separated by newlines or semicolons. Attribute values may
//! be quoted; unknown attribute keys are ignored.

use crate::graph::desc::{EdgeDesc, GraphDesc, NodeDesc, NodeType};

/// Error returned when the graph text cannot be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
  /// The text does not start with a `digraph <name> {` header.
  #[error("expected 'digraph <name> {{' header")]
  MissingHeader,
  /// The closing brace of the digraph block is missing.
  #[error("unterminated digraph block")]
  Unterminated,
  /// A statement is neither a node declaration nor an edge.
  #[error("cannot parse statement '{0}'")]
  BadStatement(String),
  /// A node declares an unsupported `type=` value.
  #[error("node {node} has unknown type '{value}'")]
  UnknownNodeType { node: String, value: String },
  /// The same node name is declared twice.
  #[error("node {0} declared twice")]
  DuplicateNode(String),
}

/// Parses graph text into a description. Structure only; well-formedness is
/// the checker's job.
pub fn parse_graph(text: &str) -> Result<GraphDesc, ParseError> {
  let (name, body) = strip_digraph(text)?;
  let mut desc = GraphDesc::new(name);

  for statement in split_statements(body) {
    let statement = statement.trim();
    if statement.is_empty() || statement.starts_with("//") || statement.starts_with('#') {
      continue;
    }
    if statement.contains("->") {
      parse_edge(statement, &mut desc)?;
    } else {
      parse_node(statement, &mut desc)?;
    }
  }
  Ok(desc)
}

fn strip_digraph(text: &str) -> Result<(String, &str), ParseError> {
  let trimmed = text.trim();
  let rest = trimmed
    .strip_prefix("digraph")
    .ok_or(ParseError::MissingHeader)?;
  let open = rest.find('{').ok_or(ParseError::MissingHeader)?;
  let name = rest[..open].trim().to_string();
  let body = &rest[open + 1..];
  let close = body.rfind('}').ok_or(ParseError::Unterminated)?;
  Ok((name, &body[..close]))
}

/// Splits on newlines and semicolons, keeping bracketed attribute lists
/// intact even when they span a separator.
fn split_statements(body: &str) -> Vec<String> {
  let mut statements = Vec::new();
  let mut current = String::new();
  let mut in_brackets = false;
  let mut in_quotes = false;
  for ch in body.chars() {
    match ch {
      '"' => {
        in_quotes = !in_quotes;
        current.push(ch);
      }
      '[' if !in_quotes => {
        in_brackets = true;
        current.push(ch);
      }
      ']' if !in_quotes => {
        in_brackets = false;
        current.push(ch);
      }
      '\n' | ';' if !in_brackets && !in_quotes => {
        statements.push(std::mem::take(&mut current));
      }
      _ => current.push(ch),
    }
  }
  statements.push(current);
  statements
}

fn parse_edge(statement: &str, desc: &mut GraphDesc) -> Result<(), ParseError> {
  let Some((lhs, rhs)) = statement.split_once("->") else {
    return Err(ParseError::BadStatement(statement.to_string()));
  };
  let (src_node, src_port) = split_endpoint(lhs.trim());
  let (dst_node, dst_port) = split_endpoint(rhs.trim());
  if src_node.is_empty() || dst_node.is_empty() {
    return Err(ParseError::BadStatement(statement.to_string()));
  }
  desc.add_edge(EdgeDesc {
    src_node,
    src_port,
    dst_node,
    dst_port,
  });
  Ok(())
}

fn split_endpoint(endpoint: &str) -> (String, Option<String>) {
  match endpoint.split_once(':') {
    Some((node, port)) => (node.trim().to_string(), Some(port.trim().to_string())),
    None => (endpoint.trim().to_string(), None),
  }
}

fn parse_node(statement: &str, desc: &mut GraphDesc) -> Result<(), ParseError> {
  let (name, attrs) = match statement.find('[') {
    Some(open) => {
      let close = statement
        .rfind(']')
        .filter(|close| *close > open)
        .ok_or_else(|| ParseError::BadStatement(statement.to_string()))?;
      (
        statement[..open].trim().to_string(),
        parse_attrs(&statement[open + 1..close]),
      )
    }
    None => (statement.trim().to_string(), Vec::new()),
  };
  if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
    return Err(ParseError::BadStatement(statement.to_string()));
  }
  if desc.node(&name).is_some() {
    return Err(ParseError::DuplicateNode(name));
  }

  let mut node_type = NodeType::Flowunit;
  let mut flowunit = None;
  let mut device = None;
  let mut device_id = None;
  for (key, value) in attrs {
    match key.as_str() {
      "type" => {
        node_type = match value.as_str() {
          "input" => NodeType::Input,
          "output" => NodeType::Output,
          "flowunit" => NodeType::Flowunit,
          other => {
            return Err(ParseError::UnknownNodeType {
              node: name,
              value: other.to_string(),
            });
          }
        }
      }
      "flowunit" => flowunit = Some(value),
      "device" => device = Some(value),
      "deviceid" => device_id = Some(value),
      // unknown keys (label, shape, ...) are ignored
      _ => {}
    }
  }

  desc.add_node(NodeDesc {
    name,
    node_type,
    flowunit,
    device,
    device_id,
  });
  Ok(())
}

fn parse_attrs(attrs: &str) -> Vec<(String, String)> {
  attrs
    .split(',')
    .filter_map(|pair| {
      let (key, value) = pair.split_once('=')?;
      let value = value.trim().trim_matches('"').to_string();
      Some((key.trim().to_string(), value))
    })
    .collect()
}
