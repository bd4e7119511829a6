use std::sync::Arc;

use crate::session::SessionManager;
use crate::status::BufferError;
use crate::test_support::RecordingIo;

#[test]
fn sessions_get_unique_ids() {
  let manager = SessionManager::new();
  let first = manager.create_session();
  let second = manager.create_session();
  assert_ne!(first.id(), second.id());
}

#[test]
fn manager_reaps_released_sessions() {
  let manager = SessionManager::new();
  let kept = manager.create_session();
  let released = manager.create_session();
  let released_id = released.id().to_string();

  assert_eq!(manager.sessions().len(), 2);
  drop(released);

  let live = manager.sessions();
  assert_eq!(live.len(), 1);
  assert!(live.contains_key(kept.id()));
  assert!(!live.contains_key(&released_id));
}

#[test]
fn delete_session_removes_the_entry() {
  let manager = SessionManager::new();
  let session = manager.create_session();
  manager.delete_session(session.id());
  assert!(manager.sessions().is_empty());
}

#[test]
fn close_is_idempotent() {
  let session = SessionManager::new().create_session();
  assert!(!session.is_closed());
  session.close();
  assert!(session.is_closed());
  session.close();
  assert!(session.is_closed());
}

#[test]
fn abort_after_close_keeps_the_session_closed() {
  let session = SessionManager::new().create_session();
  session.close();
  session.abort();
  assert!(session.is_closed());
  assert!(session.is_abort());
}

#[test]
fn io_handle_is_held_weakly() {
  let session = SessionManager::new().create_session();
  assert!(session.session_io().is_none());

  let io = RecordingIo::new();
  io.attach(&session);
  assert!(session.session_io().is_some());

  drop(io);
  assert!(session.session_io().is_none());
}

#[test]
fn finish_delivers_session_end_once() {
  let session = SessionManager::new().create_session();
  let io = RecordingIo::new();
  io.attach(&session);

  session.set_error(BufferError::new("unit_a", "bad frame"));
  session.finish();
  session.finish();

  assert_eq!(io.end_count(), 1);
  assert!(session.is_ended());
  assert!(session.is_closed());
  let delivered = io.end_error.lock().unwrap().clone();
  assert_eq!(delivered, Some(BufferError::new("unit_a", "bad frame")));
}

#[test]
fn finish_without_io_is_silent() {
  let session = SessionManager::new().create_session();
  session.finish();
  assert!(session.is_ended());
}

#[test]
fn context_counts_traffic() {
  let session = SessionManager::new().create_session();
  session.ctx().count_in(3);
  session.ctx().count_out(2);
  assert_eq!(session.ctx().buffers_in(), 3);
  assert_eq!(session.ctx().buffers_out(), 2);
}

#[test]
fn last_error_is_replaced_by_newer_errors() {
  let session = SessionManager::new().create_session();
  assert!(session.last_error().is_none());
  session.set_error(BufferError::new("u", "first"));
  session.set_error(BufferError::new("u", "second"));
  assert_eq!(
    session.last_error().map(|e| e.message().to_string()),
    Some("second".to_string())
  );
}

#[test]
fn sessions_are_shared_handles() {
  let manager = SessionManager::new();
  let session = manager.create_session();
  let alias = Arc::clone(&session);
  alias.abort();
  assert!(session.is_abort());
}
