//! Simulated device family (`type=sim`)
//!
//! Stands in for device-side DSP so the whole host stack can run without
//! hardware. Each streamer gets its own in-memory link per channel, with a
//! chain thread on the device end.
//!
//! # Address Keys
//!
//! | Key | Default | Meaning |
//! |-----|---------|---------|
//! | `tick_rate` | 1e6 | device ticks (and samples) per second |
//! | `num_channels` | 2 | channels per direction |
//! | `spp` | 200 | samples per receive packet |
//! | `underflow_timeout_ms` | 50 | stall before a transmit `UNDERFLOW` |
//! | `recv_frame_size`, `send_frame_size`, `num_recv_frames`, `num_send_frames` | see [`TransportParams`] | link geometry |
//! | `sims` | 1 | discovery only: number of simulated devices |
//!
//! `spp` and the link geometry keys may also be given per streamer in
//! [`StreamArgs::args`].
//!
//! # Thread Model
//!
//! ```text
//! ┌──────────────┐  LoopbackTransport  ┌──────────────────┐
//! │  RxStreamer  │◀───────────────────▶│ sim-rx{N} chain  │
//! └──────────────┘                     └──────────────────┘
//! ┌──────────────┐  LoopbackTransport  ┌──────────────────┐
//! │  TxStreamer  │◀───────────────────▶│ sim-tx{N} chain  │
//! └──────────────┘                     └──────────────────┘
//! ```
//!
//! A chain exits when its streamer drops the host end or when the device is
//! dropped; the device joins every chain on drop.

mod clock;
mod rx_chain;
mod tx_chain;

pub use clock::SimClock;

use crate::core::device::{Device, StreamArgs};
use crate::core::types::{DeviceAddr, DeviceFilter, TimeSpec};
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;
use crate::streaming::{RxStreamer, TxStreamer};
use crate::transport::{BoundedQueue, LoopbackTransport, TransportParams, ZeroCopyTransport};
use parking_lot::Mutex;
use rx_chain::RxChain;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tx_chain::TxChain;

/// Device type key value
pub const SIM_TYPE: &str = "sim";

/// Pending user payloads per transmit chain
const INJECTION_DEPTH: usize = 16;

/// Options of a simulated device
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Ticks (and samples) per second
    pub tick_rate: f64,
    /// Channels per direction
    pub num_channels: usize,
    /// Samples per receive packet
    pub spp: usize,
    /// Transmit stall before `UNDERFLOW`
    pub underflow_timeout: Duration,
    /// Host-end link geometry
    pub transport: TransportParams,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: 1e6,
            num_channels: 2,
            spp: 200,
            underflow_timeout: Duration::from_millis(50),
            transport: TransportParams::default(),
        }
    }
}

impl SimConfig {
    /// Read options from address keys, keeping defaults for absent keys
    pub fn from_addr(addr: &DeviceAddr) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = addr.get_parsed("tick_rate")? {
            config.tick_rate = v;
        }
        if let Some(v) = addr.get_parsed("num_channels")? {
            config.num_channels = v;
        }
        if let Some(v) = addr.get_parsed("spp")? {
            config.spp = v;
        }
        if let Some(ms) = addr.get_parsed("underflow_timeout_ms")? {
            config.underflow_timeout = Duration::from_millis(ms);
        }
        config.transport = config.transport.with_overrides(addr)?;

        if config.tick_rate.is_nan() || config.tick_rate <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "tick_rate must be positive, got {}",
                config.tick_rate
            )));
        }
        if config.num_channels == 0 || config.spp == 0 {
            return Err(Error::InvalidArgument(
                "num_channels and spp must be positive".into(),
            ));
        }
        Ok(config)
    }
}

/// Discover simulated devices.
///
/// Returns nothing when the hint names another `type`. Otherwise returns
/// `sims` devices (default 1), narrowed by `serial` and `name` in the hint.
pub fn find(hint: &DeviceAddr) -> Result<Vec<DeviceAddr>> {
    if hint.get("type").is_some_and(|t| t != SIM_TYPE) {
        return Ok(Vec::new());
    }
    let sims: usize = hint.get_parsed("sims")?.unwrap_or(1);

    let found = (0..sims)
        .map(|n| {
            let mut addr = DeviceAddr::new();
            addr.set("type", SIM_TYPE);
            addr.set("serial", format!("sim{}", n));
            addr.set("name", format!("sim-rf{}", n));
            addr
        })
        .filter(|addr| {
            ["serial", "name"]
                .iter()
                .all(|key| hint.get(key).is_none_or(|v| addr.get(key) == Some(v)))
        })
        .collect();
    Ok(found)
}

/// Register the simulated family with `registry`
pub fn register(registry: &DeviceRegistry) {
    registry.register_device(
        Arc::new(find),
        Arc::new(|addr: &DeviceAddr| -> Result<Arc<dyn Device>> {
            Ok(Arc::new(SimDevice::new(addr)?))
        }),
        DeviceFilter::Usrp,
    );
}

/// A simulated device session
pub struct SimDevice {
    args: DeviceAddr,
    config: SimConfig,
    clock: Arc<SimClock>,
    shutdown: Arc<AtomicBool>,
    chains: Mutex<Vec<JoinHandle<()>>>,
    injections: Mutex<HashMap<usize, Weak<BoundedQueue<[u32; 4]>>>>,
}

impl SimDevice {
    /// Create a device from its address
    pub fn new(addr: &DeviceAddr) -> Result<Self> {
        let config = SimConfig::from_addr(addr)?;
        log::info!(
            "Sim device {}: {} channel(s) at {} ticks/s",
            addr.get_or("serial", "?"),
            config.num_channels,
            config.tick_rate
        );
        Ok(Self {
            args: addr.clone(),
            clock: Arc::new(SimClock::new(config.tick_rate)),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            chains: Mutex::new(Vec::new()),
            injections: Mutex::new(HashMap::new()),
        })
    }

    /// Device options
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Raise a `USER_PAYLOAD` event on the transmit stream of `channel`
    pub fn inject_user_payload(&self, channel: usize, payload: [u32; 4]) -> Result<()> {
        let queue = self
            .injections
            .lock()
            .get(&channel)
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("no transmit stream on channel {}", channel))
            })?;
        if queue.push_force(payload).is_some() {
            log::warn!("Sim channel {}: user payload backlog full, oldest dropped", channel);
        }
        Ok(())
    }

    /// Number of chain threads still running
    pub fn num_active_chains(&self) -> usize {
        self.chains.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Validate channels and build the host-end geometry for a streamer
    fn stream_setup(&self, args: &StreamArgs) -> Result<(Vec<usize>, TransportParams, usize)> {
        let channels = args.channels_or_default();
        if let Some(bad) = channels.iter().find(|&&ch| ch >= self.config.num_channels) {
            return Err(Error::InvalidArgument(format!(
                "channel {} out of range, device has {}",
                bad, self.config.num_channels
            )));
        }
        let params = self.config.transport.clone().with_overrides(&args.args)?;
        let spp = args.args.get_parsed("spp")?.unwrap_or(self.config.spp);
        self.reap_chains();
        Ok((channels, params, spp))
    }

    fn spawn_chain<F>(&self, name: String, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name)
            .spawn(body)
            .map_err(|e| Error::Other(format!("Failed to spawn sim chain: {}", e)))?;
        self.chains.lock().push(handle);
        Ok(())
    }

    /// Join chains whose streamer has gone away
    fn reap_chains(&self) {
        let finished: Vec<JoinHandle<()>> = {
            let mut chains = self.chains.lock();
            let (done, live): (Vec<_>, Vec<_>) = chains.drain(..).partition(|h| h.is_finished());
            *chains = live;
            done
        };
        for handle in finished {
            if let Err(e) = handle.join() {
                log::error!("Sim chain panicked: {:?}", e);
            }
        }
    }
}

impl Device for SimDevice {
    fn device_type(&self) -> &str {
        SIM_TYPE
    }

    fn args(&self) -> &DeviceAddr {
        &self.args
    }

    fn time_now(&self) -> TimeSpec {
        self.clock.time_now()
    }

    fn get_rx_stream(&self, args: &StreamArgs) -> Result<RxStreamer> {
        let (channels, params, spp) = self.stream_setup(args)?;
        let mut links: Vec<Arc<dyn ZeroCopyTransport>> = Vec::with_capacity(channels.len());
        let mut device_ends = Vec::with_capacity(channels.len());
        for _ in &channels {
            let (host, device) = LoopbackTransport::pair(&params)?;
            links.push(Arc::new(host));
            device_ends.push(device);
        }
        let streamer = RxStreamer::new(links, args.otw_format, self.config.tick_rate, spp)?;

        for (&channel, link) in channels.iter().zip(device_ends) {
            let chain = RxChain {
                channel,
                link,
                clock: Arc::clone(&self.clock),
                shutdown: Arc::clone(&self.shutdown),
                otw: args.otw_format,
                spp,
            };
            self.spawn_chain(format!("sim-rx{}", channel), move || chain.run())?;
        }
        log::debug!("Rx stream on channels {:?} ({}, spp={})", channels, args.otw_format, spp);
        Ok(streamer)
    }

    fn get_tx_stream(&self, args: &StreamArgs) -> Result<TxStreamer> {
        let (channels, params, spp) = self.stream_setup(args)?;
        let mut links: Vec<Arc<dyn ZeroCopyTransport>> = Vec::with_capacity(channels.len());
        let mut device_ends = Vec::with_capacity(channels.len());
        for _ in &channels {
            let (host, device) = LoopbackTransport::pair(&params)?;
            links.push(Arc::new(host));
            device_ends.push(device);
        }

        for (&channel, link) in channels.iter().zip(device_ends) {
            let injections = Arc::new(BoundedQueue::new(INJECTION_DEPTH));
            let replaced = self
                .injections
                .lock()
                .insert(channel, Arc::downgrade(&injections));
            if replaced.is_some_and(|old| old.strong_count() > 0) {
                log::warn!(
                    "Sim channel {}: new transmit stream takes over user payloads",
                    channel
                );
            }
            let chain = TxChain {
                channel,
                link,
                clock: Arc::clone(&self.clock),
                shutdown: Arc::clone(&self.shutdown),
                otw: args.otw_format,
                underflow_timeout: self.config.underflow_timeout,
                injections,
            };
            self.spawn_chain(format!("sim-tx{}", channel), move || chain.run())?;
        }
        log::debug!("Tx stream on channels {:?} ({})", channels, args.otw_format);
        TxStreamer::new(links, args.otw_format, self.config.tick_rate, spp)
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        log::info!("Sim device {}: shutting down", self.args.get_or("serial", "?"));
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.chains.get_mut().drain(..) {
            if let Err(e) = handle.join() {
                log::error!("Sim chain panicked: {:?}", e);
            }
        }
    }
}
