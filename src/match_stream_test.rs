use std::sync::Arc;

use crate::lineage::{IndexInfo, Stream};
use crate::match_stream::InputMatchStreamManager;
use crate::port::InPort;
use crate::status::FlowError;
use crate::test_support::{data_buffer, end_buffer, new_session};

fn two_ports() -> Vec<Arc<InPort>> {
  vec![InPort::new("In_1", None, 0), InPort::new("In_2", None, 0)]
}

#[tokio::test]
async fn groups_by_root_stream_across_ports() {
  let session = new_session();
  let stream = Stream::new(Arc::clone(&session));
  let ports = two_ports();
  let mut mgr = InputMatchStreamManager::new("node", None, 2);
  mgr.set_input_stream_gather_all(false);

  ports[0].send(vec![data_buffer(&stream, b"left")]).await;
  ports[1].send(vec![data_buffer(&stream, b"right")]).await;

  let list = mgr.gen_match_stream_data(&ports).await.expect("match");
  assert_eq!(list.len(), 1);
  let data = &list[0];
  assert_eq!(data.session().id(), session.id());
  assert_eq!(data.data_count(), 2);
  assert_eq!(data.port_buffers().len(), 2);
}

#[tokio::test]
async fn distinct_streams_emit_in_arrival_order() {
  let session = new_session();
  let first = Stream::new(Arc::clone(&session));
  let second = Stream::new(Arc::clone(&session));
  let ports = vec![InPort::new("In_1", None, 0)];
  let mut mgr = InputMatchStreamManager::new("node", None, 1);
  mgr.set_input_stream_gather_all(false);

  ports[0]
    .send(vec![data_buffer(&first, b"f"), data_buffer(&second, b"s")])
    .await;

  let list = mgr.gen_match_stream_data(&ports).await.expect("match");
  assert_eq!(list.len(), 2);
  let stream_of = |i: usize| list[i].port_buffers()[0].1[0].index().stream().id();
  assert_eq!(stream_of(0), first.id());
  assert_eq!(stream_of(1), second.id());
}

#[tokio::test]
async fn per_port_order_is_preserved() {
  let session = new_session();
  let stream = Stream::new(session);
  let ports = vec![InPort::new("In_1", None, 0)];
  let mut mgr = InputMatchStreamManager::new("node", None, 1);
  mgr.set_input_buffer_in_order(true);
  mgr.set_input_stream_gather_all(false);

  ports[0]
    .send(vec![
      data_buffer(&stream, b"1"),
      data_buffer(&stream, b"2"),
      data_buffer(&stream, b"3"),
    ])
    .await;

  let list = mgr.gen_match_stream_data(&ports).await.expect("match");
  let payloads: Vec<Vec<u8>> = list[0].port_buffers()[0]
    .1
    .iter()
    .map(|b| b.payload().to_vec())
    .collect();
  assert_eq!(payloads, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
}

#[tokio::test]
async fn gather_all_waits_for_every_port() {
  let session = new_session();
  let stream = Stream::new(session);
  let ports = two_ports();
  let mut mgr = InputMatchStreamManager::new("node", None, 2);
  mgr.set_input_stream_gather_all(true);

  ports[0].send(vec![data_buffer(&stream, b"only left")]).await;
  let list = mgr.gen_match_stream_data(&ports).await.expect("match");
  assert!(list.is_empty(), "one-sided stream must not emit");

  ports[1].send(vec![data_buffer(&stream, b"right")]).await;
  let list = mgr.gen_match_stream_data(&ports).await.expect("match");
  assert_eq!(list.len(), 1);
  assert_eq!(list[0].data_count(), 2);
}

#[tokio::test]
async fn gather_all_accepts_an_end_flag_for_a_silent_port() {
  let session = new_session();
  let stream = Stream::new(session);
  let ports = two_ports();
  let mut mgr = InputMatchStreamManager::new("node", None, 2);
  mgr.set_input_stream_gather_all(true);

  ports[0].send(vec![data_buffer(&stream, b"data")]).await;
  ports[1].send(vec![end_buffer(&stream)]).await;

  let list = mgr.gen_match_stream_data(&ports).await.expect("match");
  assert_eq!(list.len(), 1);
}

#[tokio::test]
async fn partial_mode_emits_available_progress() {
  let session = new_session();
  let stream = Stream::new(session);
  let ports = two_ports();
  let mut mgr = InputMatchStreamManager::new("node", None, 2);
  mgr.set_input_stream_gather_all(false);

  ports[0].send(vec![data_buffer(&stream, b"early")]).await;
  let list = mgr.gen_match_stream_data(&ports).await.expect("match");
  assert_eq!(list.len(), 1);
  assert_eq!(list[0].data_count(), 1);
}

#[tokio::test]
async fn buffer_after_stream_end_is_invalid_state() {
  let session = new_session();
  let stream = Stream::new(session);
  let ports = vec![InPort::new("In_1", None, 0)];
  let mut mgr = InputMatchStreamManager::new("node", None, 1);
  mgr.set_input_stream_gather_all(false);

  ports[0].send(vec![end_buffer(&stream)]).await;
  mgr.gen_match_stream_data(&ports).await.expect("end flag drains");

  ports[0].send(vec![data_buffer(&stream, b"late")]).await;
  let err = mgr.gen_match_stream_data(&ports).await.expect_err("late buffer");
  assert!(matches!(err, FlowError::InvalidState(_)));
}

#[tokio::test]
async fn completed_sessions_are_reported_once() {
  let session = new_session();
  let stream = Stream::new(Arc::clone(&session));
  let ports = two_ports();
  let mut mgr = InputMatchStreamManager::new("node", None, 2);
  mgr.set_input_stream_gather_all(false);

  ports[0].send(vec![data_buffer(&stream, b"d"), end_buffer(&stream)]).await;
  ports[1].send(vec![end_buffer(&stream)]).await;

  mgr.gen_match_stream_data(&ports).await.expect("drain");
  let completed = mgr.take_completed_sessions();
  assert_eq!(completed.len(), 1);
  assert_eq!(completed[0].id(), session.id());
  assert!(mgr.take_completed_sessions().is_empty());
}

#[tokio::test]
async fn match_depth_regroups_expand_children() {
  let session = new_session();
  let root = IndexInfo::root(Stream::new(Arc::clone(&session)));
  let child_stream = Stream::new(Arc::clone(&session));
  let other_child_stream = Stream::new(session);

  let ports = vec![InPort::new("In_1", None, 0)];
  let mut mgr = InputMatchStreamManager::new("node", None, 1);
  mgr.set_input_stream_gather_all(false);
  mgr.set_match_depth(1);

  let first = root.expand_child(Arc::clone(&child_stream));
  let second = root.expand_child(Arc::clone(&child_stream));
  let other = root.expand_child(Arc::clone(&other_child_stream));
  ports[0]
    .send(vec![
      crate::buffer::Buffer::new(bytes::Bytes::from_static(b"a"), first),
      crate::buffer::Buffer::new(bytes::Bytes::from_static(b"b"), second),
      crate::buffer::Buffer::new(bytes::Bytes::from_static(b"c"), other),
    ])
    .await;

  let list = mgr.gen_match_stream_data(&ports).await.expect("match");
  assert_eq!(list.len(), 2, "one group per child stream");
  assert_eq!(list[0].data_count(), 2);
  assert_eq!(list[1].data_count(), 1);
  // no session completion below the root level
  assert!(mgr.take_completed_sessions().is_empty());
}

#[tokio::test]
async fn queue_size_limits_one_round_of_consumption() {
  let session = new_session();
  let stream = Stream::new(session);
  let ports = vec![InPort::new("In_1", None, 0)];
  let mut mgr = InputMatchStreamManager::new("node", Some(2), 1);
  mgr.set_input_stream_gather_all(false);

  ports[0]
    .send((0..5).map(|_| data_buffer(&stream, b"x")).collect())
    .await;

  let list = mgr.gen_match_stream_data(&ports).await.expect("match");
  assert_eq!(list[0].data_count(), 2);
  assert_eq!(ports[0].queue().len().await, 3);
}
