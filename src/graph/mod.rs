//! Graph description, parsing, static checking, and the build pipeline.

pub mod checker;
pub mod desc;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod parse;

pub use checker::{CheckReport, GraphChecker};
pub use desc::{EdgeDesc, GraphDesc, NodeDesc, NodeType};
pub use graph::{BuiltNodeKind, Graph, GraphNode};
pub use parse::{ParseError, parse_graph};
