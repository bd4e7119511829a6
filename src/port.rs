//! Ports and the bounded buffer queue between nodes.
//!
//! An [`InPort`] owns a [`BufferQueue`]: a FIFO with optional capacity,
//! head peeking, and timed receive. An [`OutPort`] holds the connected
//! in-ports and fans each sent batch out to all of them. Queues are
//! many-producer single-consumer: several upstream ports may feed one
//! in-port, one node drains it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::buffer::Buffer;

/// How long a receive is willing to wait.
///
/// The reference engine overloads a signed timeout; here the convention is
/// explicit: `Poll` never blocks, `Block` waits indefinitely, `Until` waits
/// up to the given duration and then returns empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeout {
  Poll,
  Block,
  Until(Duration),
}

/// Bounded FIFO of buffers. Capacity `None` means unbounded: a send never
/// rejects and never waits.
pub struct BufferQueue {
  queue: Mutex<VecDeque<Buffer>>,
  capacity: Option<usize>,
  data_ready: Notify,
  space_ready: Notify,
}

impl BufferQueue {
  pub fn new(capacity: Option<usize>) -> Self {
    Self {
      queue: Mutex::new(VecDeque::new()),
      capacity,
      data_ready: Notify::new(),
      space_ready: Notify::new(),
    }
  }

  pub fn capacity(&self) -> Option<usize> {
    self.capacity
  }

  pub async fn len(&self) -> usize {
    self.queue.lock().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.queue.lock().await.is_empty()
  }

  /// Appends a batch, waiting for space when the queue is bounded.
  pub async fn push_batch(&self, batch: Vec<Buffer>) {
    let mut pending: VecDeque<Buffer> = batch.into();
    loop {
      {
        let mut queue = self.queue.lock().await;
        match self.capacity {
          None => queue.extend(pending.drain(..)),
          Some(cap) => {
            while queue.len() < cap {
              match pending.pop_front() {
                Some(buffer) => queue.push_back(buffer),
                None => break,
              }
            }
          }
        }
        if !queue.is_empty() {
          self.data_ready.notify_one();
        }
      }
      if pending.is_empty() {
        return;
      }
      self.space_ready.notified().await;
    }
  }

  /// Clones the head buffer without removing it.
  pub async fn front(&self) -> Option<Buffer> {
    self.queue.lock().await.front().cloned()
  }

  /// Removes and returns the head buffer.
  pub async fn pop(&self) -> Option<Buffer> {
    let popped = self.queue.lock().await.pop_front();
    if popped.is_some() {
      self.space_ready.notify_one();
    }
    popped
  }

  /// Drains up to `limit` buffers into `out`, waiting according to
  /// `timeout`. Returns the number of buffers moved; `0` after a `Poll` on
  /// an empty queue or an expired `Until`.
  pub async fn recv(&self, out: &mut Vec<Buffer>, limit: Option<usize>, timeout: RecvTimeout) -> usize {
    match timeout {
      RecvTimeout::Poll => self.drain_into(out, limit).await,
      RecvTimeout::Block => self.recv_blocking(out, limit).await,
      RecvTimeout::Until(duration) => {
        match tokio::time::timeout(duration, self.recv_blocking(out, limit)).await {
          Ok(moved) => moved,
          Err(_) => 0,
        }
      }
    }
  }

  async fn recv_blocking(&self, out: &mut Vec<Buffer>, limit: Option<usize>) -> usize {
    loop {
      let moved = self.drain_into(out, limit).await;
      if moved > 0 {
        return moved;
      }
      self.data_ready.notified().await;
    }
  }

  async fn drain_into(&self, out: &mut Vec<Buffer>, limit: Option<usize>) -> usize {
    let mut queue = self.queue.lock().await;
    let take = match limit {
      Some(limit) => limit.min(queue.len()),
      None => queue.len(),
    };
    out.extend(queue.drain(..take));
    if take > 0 {
      self.space_ready.notify_one();
    }
    take
  }
}

/// Named receiving port of a node.
pub struct InPort {
  name: String,
  priority: u32,
  queue: Arc<BufferQueue>,
}

impl InPort {
  pub fn new(name: impl Into<String>, capacity: Option<usize>, priority: u32) -> Arc<Self> {
    Arc::new(Self {
      name: name.into(),
      priority,
      queue: Arc::new(BufferQueue::new(capacity)),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn priority(&self) -> u32 {
    self.priority
  }

  pub fn queue(&self) -> &Arc<BufferQueue> {
    &self.queue
  }

  pub async fn recv(&self, out: &mut Vec<Buffer>, limit: Option<usize>, timeout: RecvTimeout) -> usize {
    self.queue.recv(out, limit, timeout).await
  }

  pub async fn send(&self, batch: Vec<Buffer>) {
    self.queue.push_batch(batch).await;
  }
}

/// Named emitting port of a node; fans batches out to every connected
/// in-port.
pub struct OutPort {
  name: String,
  targets: StdMutex<Vec<Arc<InPort>>>,
}

impl OutPort {
  pub fn new(name: impl Into<String>) -> Arc<Self> {
    Arc::new(Self {
      name: name.into(),
      targets: StdMutex::new(Vec::new()),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn connect(&self, target: Arc<InPort>) {
    let mut targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
    targets.push(target);
  }

  pub fn target_count(&self) -> usize {
    let targets = self.targets.lock().unwrap_or_else(|e| e.into_inner());
    targets.len()
  }

  pub async fn send(&self, batch: Vec<Buffer>) {
    if batch.is_empty() {
      return;
    }
    let targets: Vec<Arc<InPort>> = {
      let guard = self.targets.lock().unwrap_or_else(|e| e.into_inner());
      guard.clone()
    };
    for target in &targets {
      target.send(batch.clone()).await;
    }
  }
}
