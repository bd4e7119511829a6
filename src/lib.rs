#![doc = include_str!("../README.md")]

#[cfg(test)]
mod match_stream_test;
#[cfg(test)]
mod session_test;
#[cfg(test)]
mod test_support;
#[cfg(test)]
mod virtual_node_test;

pub mod buffer;
pub mod config;
pub mod device;
pub mod external_io;
pub mod flowunit;
pub mod graph;
pub mod lineage;
pub mod match_stream;
pub mod node;
pub mod port;
pub mod session;
pub mod status;
pub mod virtual_node;

pub use buffer::{Buffer, OutputBufferMap};
pub use config::{Configuration, ConfigurationBuilder};
pub use device::{CpuDevice, Device, DeviceManager};
pub use external_io::ExternalIoMap;
pub use flowunit::{
  ConditionType, FlowType, FlowunitDesc, FlowunitRegistry, LoopType, OutputType,
};
pub use graph::{BuiltNodeKind, Graph, GraphChecker, GraphDesc, GraphNode};
pub use lineage::{IndexInfo, InheritInfo, Stream};
pub use match_stream::{InputMatchStreamManager, MatchStreamData};
pub use node::{NodeState, NodeUnit, RunKind};
pub use port::{BufferQueue, InPort, OutPort, RecvTimeout};
pub use session::{Session, SessionContext, SessionIo, SessionManager};
pub use status::{BufferError, DrainState, FlowError};
pub use virtual_node::{
  InputVirtualNode, OutputUnmatchVirtualNode, OutputVirtualNode, SessionUnmatchCache,
};
