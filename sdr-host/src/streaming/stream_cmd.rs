//! Stream commands
//!
//! A stream command tells the receive path of a device when to start, how
//! many samples to produce and whether another command follows.
//!
//! For synchronized starts across several channels or devices, issue the
//! first command with a near-future time rather than `stream_now`.

use crate::core::types::TimeSpec;

/// Streaming mode, encoded on the wire as one ASCII byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamMode {
    /// Stream until a stop command
    StartContinuous = b'a',
    /// Stop continuous streaming
    StopContinuous = b'o',
    /// Stream `num_samps` samples and end the burst
    NumSampsAndDone = b'd',
    /// Stream `num_samps` samples and expect another command
    NumSampsAndMore = b'm',
}

impl StreamMode {
    /// Decode a wire byte
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            b'a' => Some(Self::StartContinuous),
            b'o' => Some(Self::StopContinuous),
            b'd' => Some(Self::NumSampsAndDone),
            b'm' => Some(Self::NumSampsAndMore),
            _ => None,
        }
    }

    /// Wire byte
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Streams a fixed number of samples
    pub fn is_fixed_count(self) -> bool {
        matches!(self, Self::NumSampsAndDone | Self::NumSampsAndMore)
    }
}

/// A stream command
#[derive(Debug, Clone, PartialEq)]
pub struct StreamCmd {
    /// What to do
    pub stream_mode: StreamMode,
    /// Sample count for the fixed-count modes
    pub num_samps: u64,
    /// Start immediately, ignoring `time_spec`
    pub stream_now: bool,
    /// Start time when `stream_now` is false
    pub time_spec: TimeSpec,
}

impl StreamCmd {
    /// Immediate command of the given mode
    pub fn new(stream_mode: StreamMode) -> Self {
        Self {
            stream_mode,
            num_samps: 0,
            stream_now: true,
            time_spec: TimeSpec::default(),
        }
    }

    /// Continuous streaming, starting now
    pub fn start_continuous() -> Self {
        Self::new(StreamMode::StartContinuous)
    }

    /// Stop streaming
    pub fn stop() -> Self {
        Self::new(StreamMode::StopContinuous)
    }

    /// `num_samps` samples, then end of burst
    pub fn num_samps_and_done(num_samps: u64) -> Self {
        Self {
            num_samps,
            ..Self::new(StreamMode::NumSampsAndDone)
        }
    }

    /// `num_samps` samples, then the next command continues the chain
    pub fn num_samps_and_more(num_samps: u64) -> Self {
        Self {
            num_samps,
            ..Self::new(StreamMode::NumSampsAndMore)
        }
    }

    /// Schedule the command at `time` instead of now
    pub fn at(mut self, time: TimeSpec) -> Self {
        self.stream_now = false;
        self.time_spec = time;
        self
    }

    /// Starts (or continues) streaming
    pub fn is_start(&self) -> bool {
        self.stream_mode != StreamMode::StopContinuous
    }
}
