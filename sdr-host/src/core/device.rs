//! Device trait definition

use crate::core::types::{DeviceAddr, TimeSpec};
use crate::error::Result;
use crate::streaming::{OtwFormat, RxStreamer, TxStreamer};

/// Arguments for creating a streamer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamArgs {
    /// Over-the-wire sample format
    pub otw_format: OtwFormat,
    /// Device channel indices, in streamer order; empty means channel 0
    pub channels: Vec<usize>,
    /// Extra arguments (`spp`, transport frame geometry)
    pub args: DeviceAddr,
}

impl StreamArgs {
    /// Stream the given channels in the default wire format
    pub fn new(channels: Vec<usize>) -> Self {
        Self {
            channels,
            ..Self::default()
        }
    }

    /// Channels to stream, defaulting to channel 0
    pub fn channels_or_default(&self) -> Vec<usize> {
        if self.channels.is_empty() {
            vec![0]
        } else {
            self.channels.clone()
        }
    }
}

/// A device session.
///
/// Sessions are shared as `Arc<dyn Device>`; a family implements this trait
/// and registers find/make functions with a
/// [`DeviceRegistry`](crate::registry::DeviceRegistry).
pub trait Device: Send + Sync {
    /// Device family name (e.g. "sim")
    fn device_type(&self) -> &str;

    /// Address the session was made from, overlay defaults included
    fn args(&self) -> &DeviceAddr;

    /// Current device time
    fn time_now(&self) -> TimeSpec;

    /// Create a receive streamer
    fn get_rx_stream(&self, args: &StreamArgs) -> Result<RxStreamer>;

    /// Create a transmit streamer
    fn get_tx_stream(&self, args: &StreamArgs) -> Result<TxStreamer>;
}
