//! Device families
//!
//! Each family provides `find`/`make` functions registered with a
//! [`DeviceRegistry`](crate::registry::DeviceRegistry).

pub mod sim;

pub use sim::SimDevice;

use crate::registry::DeviceRegistry;

/// Register every built-in device family
pub fn register_all(registry: &DeviceRegistry) {
    sim::register(registry);
}
