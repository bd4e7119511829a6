use std::sync::Arc;

use crate::buffer::{Buffer, OutputBufferMap};
use crate::config::ConfigurationBuilder;
use crate::device::DeviceManager;
use crate::lineage::{IndexInfo, Stream};
use crate::node::{NodeUnit, RunKind};
use crate::port::InPort;
use crate::status::{BufferError, DrainState};
use crate::test_support::{RecordingIo, data_buffer, end_buffer, new_session};
use crate::virtual_node::{
  InputVirtualNode, OutputUnmatchVirtualNode, OutputVirtualNode, SessionUnmatchCache,
};

fn names(list: &[&str]) -> Vec<String> {
  list.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn input_virtual_node_forwards_unchanged() {
  let config = ConfigurationBuilder::new().set("queue_size_external", 8).build();
  let mut node = InputVirtualNode::new("input1", "cpu", "0", Some(DeviceManager::new()));
  node.init(&[], &names(&["Out_1"]), &config).expect("init");
  node.open().await.expect("open");

  let extern_port = node.extern_port("Out_1").expect("extern port");
  assert_eq!(extern_port.queue().capacity(), Some(8));

  let downstream = InPort::new("In_1", None, 0);
  node
    .state()
    .output_port("Out_1")
    .expect("out port")
    .connect(Arc::clone(&downstream));

  let session = new_session();
  let stream = Stream::new(session);
  extern_port
    .send(vec![data_buffer(&stream, b"a"), data_buffer(&stream, b"b")])
    .await;

  node.run(RunKind::Data).await.expect("run");

  assert_eq!(downstream.queue().len().await, 2);
  assert!(extern_port.queue().is_empty().await);
  let head = downstream.queue().front().await.expect("head");
  // no lineage synthesis: the pushed index rides through
  assert_eq!(head.index().depth(), 0);
  assert_eq!(head.payload().as_ref(), b"a");
}

#[tokio::test]
async fn input_virtual_node_rejects_duplicate_ports() {
  let config = ConfigurationBuilder::new().build();
  let mut node = InputVirtualNode::new("input1", "cpu", "0", None);
  assert!(node.init(&[], &names(&["Out_1", "Out_1"]), &config).is_err());
}

#[tokio::test]
async fn missing_device_manager_is_not_fatal() {
  let config = ConfigurationBuilder::new().build();
  let mut node = InputVirtualNode::new("input1", "cpu", "0", None);
  node.init(&[], &names(&["Out_1"]), &config).expect("init");
  assert!(node.device().is_none());
  node.run(RunKind::Data).await.expect("run succeeds without device");

  let mut with_mgr = InputVirtualNode::new("input2", "cpu", "0", Some(DeviceManager::new()));
  with_mgr.init(&[], &names(&["Out_1"]), &config).expect("init");
  let device = with_mgr.device().expect("cpu device");
  assert_eq!(device.name(), "cpu");
}

#[tokio::test]
async fn output_virtual_node_filters_and_reduces_errors() {
  let config = ConfigurationBuilder::new().build();
  let mut node = OutputVirtualNode::new("output1", "cpu", "0", Some(DeviceManager::new()));
  node.init(&names(&["In_1"]), &[], &config).expect("init");

  let session = new_session();
  let io = RecordingIo::new();
  io.attach(&session);
  let stream = Stream::new(Arc::clone(&session));

  let root = IndexInfo::root(Arc::clone(&stream));
  let failed = data_buffer(&stream, b"bad").with_error(BufferError::new("unit", "boom"));
  let port = node.state().input_port("In_1").expect("port");
  port
    .send(vec![
      data_buffer(&stream, b"good"),
      Buffer::marker(root.placeholder()),
      failed,
      end_buffer(&stream),
    ])
    .await;

  node.run(RunKind::Data).await.expect("run");

  let outputs = io.outputs();
  assert_eq!(outputs.len(), 1);
  let delivered = &outputs[0]["In_1"];
  assert_eq!(delivered.len(), 2, "end flag and placeholder are filtered");
  assert!(delivered.iter().all(|b| !b.index().is_end_flag()));
  assert!(delivered.iter().all(|b| !b.index().is_placeholder()));
  assert_eq!(
    io.last_error().map(|e| e.message().to_string()),
    Some("boom".to_string())
  );

  // the root stream ended on every port, so the session is finished once
  assert_eq!(io.end_count(), 1);
  assert!(session.is_ended());
}

#[tokio::test]
async fn output_virtual_node_skips_aborted_sessions() {
  let config = ConfigurationBuilder::new().build();
  let mut node = OutputVirtualNode::new("output1", "cpu", "0", Some(DeviceManager::new()));
  node.init(&names(&["In_1"]), &[], &config).expect("init");

  let session = new_session();
  let io = RecordingIo::new();
  io.attach(&session);
  session.abort();

  let stream = Stream::new(session);
  let port = node.state().input_port("In_1").expect("port");
  port.send(vec![data_buffer(&stream, b"dropped")]).await;

  node.run(RunKind::Data).await.expect("run");
  assert_eq!(io.output_count(), 0);
}

#[tokio::test]
async fn erase_invalid_data_unblocks_the_queue() {
  let config = ConfigurationBuilder::new().build();
  let mut node = OutputVirtualNode::new("output1", "cpu", "0", Some(DeviceManager::new()));
  node.init(&names(&["In_1"]), &[], &config).expect("init");

  // this session never had an I/O handle: its buffers are dead weight
  let dead = new_session();
  let dead_stream = Stream::new(dead);

  let live = new_session();
  let io = RecordingIo::new();
  io.attach(&live);
  let live_stream = Stream::new(Arc::clone(&live));

  let port = node.state().input_port("In_1").expect("port");
  port
    .send(vec![
      data_buffer(&dead_stream, b"stale"),
      data_buffer(&live_stream, b"fresh"),
    ])
    .await;

  node.run(RunKind::Data).await.expect("run");

  let outputs = io.outputs();
  assert_eq!(outputs.len(), 1);
  assert_eq!(outputs[0]["In_1"].len(), 1);
  assert_eq!(outputs[0]["In_1"][0].payload().as_ref(), b"fresh");
}

#[tokio::test]
async fn erase_invalid_data_keeps_live_heads() {
  let config = ConfigurationBuilder::new().build();
  let mut node = OutputVirtualNode::new("output1", "cpu", "0", Some(DeviceManager::new()));
  node.init(&names(&["In_1"]), &[], &config).expect("init");

  let live = new_session();
  let io = RecordingIo::new();
  io.attach(&live);
  let stream = Stream::new(live);

  let port = node.state().input_port("In_1").expect("port");
  port.send(vec![data_buffer(&stream, b"kept")]).await;

  node.run(RunKind::Data).await.expect("run");
  assert_eq!(io.output_count(), 1);
}

#[test]
fn unmatch_cache_pop_on_empty_is_nodata() {
  let mut cache = SessionUnmatchCache::new(names(&["In_1", "In_2"]));
  let mut output = OutputBufferMap::new();
  assert_eq!(cache.pop_cache(&mut output), DrainState::NoData);
  assert!(output["In_1"].is_empty());
  assert!(output["In_2"].is_empty());
}

#[test]
fn unmatch_cache_advances_one_stream_per_pop() {
  let session = new_session();
  let first = Stream::new(Arc::clone(&session));
  let second = Stream::new(session);

  let mut cache = SessionUnmatchCache::new(names(&["In_1"]));
  cache.cache_buffer("In_1", data_buffer(&first, b"f1")).expect("cache");
  cache.cache_buffer("In_1", data_buffer(&first, b"f2")).expect("cache");
  cache.cache_buffer("In_1", data_buffer(&second, b"s1")).expect("cache");

  let mut output = OutputBufferMap::new();
  assert_eq!(cache.pop_cache(&mut output), DrainState::Continue);
  assert_eq!(output["In_1"].len(), 2, "oldest stream first");

  let mut output = OutputBufferMap::new();
  assert_eq!(cache.pop_cache(&mut output), DrainState::Continue);
  assert_eq!(output["In_1"].len(), 1);

  let mut output = OutputBufferMap::new();
  assert_eq!(cache.pop_cache(&mut output), DrainState::NoData);
}

#[test]
fn unmatch_cache_tracks_top_level_end_flags() {
  let session = new_session();
  let left = Stream::new(Arc::clone(&session));
  let right = Stream::new(session);

  let mut cache = SessionUnmatchCache::new(names(&["In_1", "In_2"]));
  assert!(!cache.all_port_stream_end());

  cache.cache_buffer("In_1", end_buffer(&left)).expect("cache");
  assert!(!cache.all_port_stream_end());
  cache.cache_buffer("In_2", end_buffer(&right)).expect("cache");
  assert!(cache.all_port_stream_end());
}

#[test]
fn unmatch_cache_deep_end_flag_does_not_end_the_port() {
  let session = new_session();
  let root = IndexInfo::root(Stream::new(Arc::clone(&session)));
  let child_stream = Stream::new(session);
  let child_end = Buffer::marker(root.expand_end_flag(child_stream));

  let mut cache = SessionUnmatchCache::new(names(&["In_1"]));
  cache.cache_buffer("In_1", child_end).expect("cache");
  // the root ancestor is not an end flag, so the port is still open
  assert!(!cache.all_port_stream_end());
}

#[test]
fn unmatch_cache_records_last_error() {
  let session = new_session();
  let stream = Stream::new(session);
  let mut cache = SessionUnmatchCache::new(names(&["In_1"]));

  cache
    .cache_buffer(
      "In_1",
      data_buffer(&stream, b"x").with_error(BufferError::new("u", "first")),
    )
    .expect("cache");
  cache
    .cache_buffer(
      "In_1",
      data_buffer(&stream, b"y").with_error(BufferError::new("u", "second")),
    )
    .expect("cache");

  assert_eq!(
    cache.last_error().map(|e| e.message().to_string()),
    Some("second".to_string())
  );
}

#[tokio::test]
async fn unmatch_node_drains_and_finishes_sessions() {
  let config = ConfigurationBuilder::new().build();
  let mut node = OutputUnmatchVirtualNode::new("output1", "cpu", "0", Some(DeviceManager::new()));
  node.init(&names(&["In_1", "In_2"]), &[], &config).expect("init");

  let session = new_session();
  let io = RecordingIo::new();
  io.attach(&session);
  let left = Stream::new(Arc::clone(&session));
  let right = Stream::new(Arc::clone(&session));

  node
    .state()
    .input_port("In_1")
    .expect("port")
    .send(vec![data_buffer(&left, b"payload"), end_buffer(&left)])
    .await;
  node
    .state()
    .input_port("In_2")
    .expect("port")
    .send(vec![end_buffer(&right)])
    .await;

  node.run(RunKind::Data).await.expect("run");

  let outputs = io.outputs();
  assert_eq!(outputs.len(), 1);
  assert_eq!(outputs[0]["In_1"].len(), 1);
  assert!(outputs[0]["In_2"].is_empty());
  assert_eq!(io.end_count(), 1);
  assert!(session.is_ended());

  // the session entry is gone: another run delivers nothing
  node.run(RunKind::Data).await.expect("run again");
  assert_eq!(io.output_count(), 1);
}

#[tokio::test]
async fn unmatch_node_ignores_aborted_sessions() {
  let config = ConfigurationBuilder::new().build();
  let mut node = OutputUnmatchVirtualNode::new("output1", "cpu", "0", Some(DeviceManager::new()));
  node.init(&names(&["In_1"]), &[], &config).expect("init");

  let session = new_session();
  let io = RecordingIo::new();
  io.attach(&session);
  session.abort();
  let stream = Stream::new(session);

  node
    .state()
    .input_port("In_1")
    .expect("port")
    .send(vec![data_buffer(&stream, b"dropped")])
    .await;

  node.run(RunKind::Data).await.expect("run");
  assert_eq!(io.output_count(), 0);
}
