//! sdr-host - Host-side streaming runtime for software-defined radios
//!
//! Moves IQ samples between host memory and device DSP over zero-copy
//! transports, and resolves device addresses to shared device sessions.
//!
//! ## Modules
//!
//! - [`transport`]: bounded queue, frame pools, managed buffers, loopback link
//! - [`streaming`]: metadata, wire packets, receive and transmit streamers
//! - [`registry`]: device discovery, construction and session cache
//! - [`config`]: persisted per-device defaults
//! - [`devices`]: device families (simulated devices)
//!
//! ## Example
//!
//! ```no_run
//! use sdr_host::core::{DeviceAddr, DeviceFilter, StreamArgs};
//! use sdr_host::registry::DeviceRegistry;
//! use sdr_host::streaming::{RxMetadata, StreamCmd};
//! use num_complex::Complex;
//! use std::time::Duration;
//!
//! # fn main() -> sdr_host::Result<()> {
//! let registry = DeviceRegistry::new();
//! sdr_host::devices::register_all(&registry);
//!
//! let device = registry.make(&DeviceAddr::parse("type=sim"), DeviceFilter::Any, 0)?;
//! let mut rx = device.get_rx_stream(&StreamArgs::new(vec![0]))?;
//! rx.issue_stream_cmd(&StreamCmd::num_samps_and_done(1000))?;
//!
//! let mut buff = vec![Complex::<f32>::default(); 1000];
//! let mut md = RxMetadata::default();
//! let n = rx.recv(&mut [&mut buff[..]], 1000, &mut md, Duration::from_millis(100), false)?;
//! println!("{} samples, {}", n, md.to_pp_string(true));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod devices;
pub mod error;
pub mod registry;
pub mod streaming;
pub mod transport;

// Re-export commonly used types
pub use crate::config::{ConfigOverlay, DeviceDefaults};
pub use crate::core::{Device, DeviceAddr, DeviceFilter, StreamArgs, TimeSpec};
pub use crate::error::{Error, Result};
pub use crate::registry::DeviceRegistry;
