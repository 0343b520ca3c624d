//! Core abstractions for devices.
//!
//! - [`device::Device`]: trait each device family implements
//! - [`types`]: addresses, filters and device time

pub mod device;
pub mod types;

pub use device::{Device, StreamArgs};
pub use types::{DeviceAddr, DeviceFilter, TimeSpec};
