//! Device contract for boundary nodes.
//!
//! The engine core does not manage resources itself; it only resolves a
//! named device through a [`DeviceManager`] when a virtual node asks for
//! one. A missing manager or unknown device is logged and yields `None`,
//! which is observable but not fatal.

use std::sync::Arc;

use tracing::error;

pub trait Device: Send + Sync {
  fn name(&self) -> &str;
  fn id(&self) -> &str;
}

/// Host CPU device. The only device the core provides on its own.
pub struct CpuDevice {
  id: String,
}

impl Device for CpuDevice {
  fn name(&self) -> &str {
    "cpu"
  }

  fn id(&self) -> &str {
    &self.id
  }
}

#[derive(Default)]
pub struct DeviceManager;

impl DeviceManager {
  pub fn new() -> Arc<Self> {
    Arc::new(Self)
  }

  pub fn create_device(&self, name: &str, id: &str) -> Option<Arc<dyn Device>> {
    match name {
      "cpu" => Some(Arc::new(CpuDevice { id: id.to_string() })),
      other => {
        error!(device = other, device_id = id, "unknown device");
        None
      }
    }
  }
}
