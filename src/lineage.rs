//! Buffer lineage: streams, inherit chains, and index tags.
//!
//! Every buffer inside the engine carries exactly one [`IndexInfo`]. The
//! index names the buffer's [`Stream`] (its sub-stream identity), whether the
//! buffer is the synthetic terminator of that stream (`end_flag`), whether it
//! is a position-preserving placeholder, and an [`InheritInfo`] chain linking
//! it back to a depth-0 ancestor. Expand derives children one level deeper;
//! collapse consumes a level back toward the parent.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::session::Session;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_INDEX_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one sub-stream, owned by a session.
#[derive(Debug)]
pub struct Stream {
  id: u64,
  session: Arc<Session>,
}

impl Stream {
  pub fn new(session: Arc<Session>) -> Arc<Self> {
    Arc::new(Self {
      id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
      session,
    })
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }
}

/// Link from an index back toward its depth-0 ancestor.
///
/// `inherit_from` is `None` exactly when `depth == 0`.
#[derive(Debug, Clone)]
pub struct InheritInfo {
  depth: usize,
  inherit_from: Option<Arc<IndexInfo>>,
}

impl InheritInfo {
  pub fn root() -> Self {
    Self {
      depth: 0,
      inherit_from: None,
    }
  }

  pub fn depth(&self) -> usize {
    self.depth
  }

  pub fn inherit_from(&self) -> Option<&Arc<IndexInfo>> {
    self.inherit_from.as_ref()
  }
}

/// Lineage tag of a buffer.
#[derive(Debug)]
pub struct IndexInfo {
  id: u64,
  stream: Arc<Stream>,
  end_flag: bool,
  placeholder: bool,
  inherit: InheritInfo,
}

impl IndexInfo {
  fn create(stream: Arc<Stream>, end_flag: bool, placeholder: bool, inherit: InheritInfo) -> Arc<Self> {
    Arc::new(Self {
      id: NEXT_INDEX_ID.fetch_add(1, Ordering::Relaxed),
      stream,
      end_flag,
      placeholder,
      inherit,
    })
  }

  /// A depth-0 data index on `stream`.
  pub fn root(stream: Arc<Stream>) -> Arc<Self> {
    Self::create(stream, false, false, InheritInfo::root())
  }

  /// The depth-0 terminator of `stream`. A depth-0 end-flag signals
  /// session-level end.
  pub fn root_end_flag(stream: Arc<Stream>) -> Arc<Self> {
    Self::create(stream, true, false, InheritInfo::root())
  }

  /// A child index one level below `self`, as produced by an expand.
  pub fn expand_child(self: &Arc<Self>, stream: Arc<Stream>) -> Arc<Self> {
    Self::create(
      stream,
      false,
      false,
      InheritInfo {
        depth: self.depth() + 1,
        inherit_from: Some(Arc::clone(self)),
      },
    )
  }

  /// The terminator of a child stream opened by an expand from `self`.
  pub fn expand_end_flag(self: &Arc<Self>, stream: Arc<Stream>) -> Arc<Self> {
    Self::create(
      stream,
      true,
      false,
      InheritInfo {
        depth: self.depth() + 1,
        inherit_from: Some(Arc::clone(self)),
      },
    )
  }

  /// A placeholder index at the same level as `self`, preserving position
  /// across expand/collapse.
  pub fn placeholder(self: &Arc<Self>) -> Arc<Self> {
    Self::create(
      Arc::clone(&self.stream),
      false,
      true,
      self.inherit.clone(),
    )
  }

  /// An index produced by a collapse: it rejoins the stream of the parent
  /// ancestor, one level above `self`.
  pub fn collapse_to_parent(self: &Arc<Self>) -> Option<Arc<Self>> {
    let parent = self.inherit.inherit_from.as_ref()?;
    Some(Self::create(
      Arc::clone(&parent.stream),
      false,
      false,
      parent.inherit.clone(),
    ))
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn stream(&self) -> &Arc<Stream> {
    &self.stream
  }

  pub fn session(&self) -> &Arc<Session> {
    self.stream.session()
  }

  pub fn is_end_flag(&self) -> bool {
    self.end_flag
  }

  pub fn is_placeholder(&self) -> bool {
    self.placeholder
  }

  pub fn inherit(&self) -> &InheritInfo {
    &self.inherit
  }

  pub fn depth(&self) -> usize {
    self.inherit.depth
  }

  /// Walks the inherit chain up to the depth-0 ancestor.
  pub fn root_ancestor(self: &Arc<Self>) -> Arc<Self> {
    let mut cur = Arc::clone(self);
    while cur.inherit.depth > 0 {
      let next = match cur.inherit.inherit_from.as_ref() {
        Some(parent) => Arc::clone(parent),
        None => break,
      };
      cur = next;
    }
    cur
  }

  /// The ancestor at exactly `depth`, or `None` when `self` lives above it.
  pub fn ancestor_at_depth(self: &Arc<Self>, depth: usize) -> Option<Arc<Self>> {
    if self.inherit.depth < depth {
      return None;
    }
    let mut cur = Arc::clone(self);
    while cur.inherit.depth > depth {
      let next = match cur.inherit.inherit_from.as_ref() {
        Some(parent) => Arc::clone(parent),
        None => return None,
      };
      cur = next;
    }
    Some(cur)
  }
}
