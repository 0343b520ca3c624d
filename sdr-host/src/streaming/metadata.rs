//! Streaming metadata
//!
//! Per-call descriptions of timing, bursts, fragmentation and error
//! conditions for receive and transmit, plus asynchronous device events.
//!
//! ## Receive error codes
//!
//! Exactly one code is reported per `recv` call:
//!
//! | Code | Wire | Meaning |
//! |---|---|---|
//! | `None` | 0x0 | samples (or metadata only) delivered |
//! | `Timeout` | 0x1 | no packet within the timeout |
//! | `LateCommand` | 0x2 | a timed stream command arrived after its time |
//! | `BrokenChain` | 0x4 | `NumSampsAndMore` ran out with no follow-up |
//! | `Overflow` | 0x8 | overflow, or a sequence gap when `out_of_sequence` is set |
//! | `Alignment` | 0xc | channels could not be time aligned |
//! | `BadPacket` | 0xf | malformed wire packet |
//!
//! Only `None` makes the time, burst and fragment fields meaningful. A
//! reported `Overflow` may still carry the time at which streaming resumed.

use crate::core::types::TimeSpec;
use std::fmt;

/// Receive error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum RxErrorCode {
    /// No error
    #[default]
    None = 0x0,
    /// No packet received within the timeout
    Timeout = 0x1,
    /// Stream command time already elapsed
    LateCommand = 0x2,
    /// Expected another stream command
    BrokenChain = 0x4,
    /// Overflow or sequence error (see `out_of_sequence`)
    Overflow = 0x8,
    /// Multi-channel alignment failed
    Alignment = 0xc,
    /// Malformed packet
    BadPacket = 0xf,
}

impl RxErrorCode {
    /// Decode a wire value
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0x0 => Some(Self::None),
            0x1 => Some(Self::Timeout),
            0x2 => Some(Self::LateCommand),
            0x4 => Some(Self::BrokenChain),
            0x8 => Some(Self::Overflow),
            0xc => Some(Self::Alignment),
            0xf => Some(Self::BadPacket),
            _ => None,
        }
    }

    /// Wire value
    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for RxErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "ERROR_CODE_NONE",
            Self::Timeout => "ERROR_CODE_TIMEOUT",
            Self::LateCommand => "ERROR_CODE_LATE_COMMAND",
            Self::BrokenChain => "ERROR_CODE_BROKEN_CHAIN",
            Self::Overflow => "ERROR_CODE_OVERFLOW",
            Self::Alignment => "ERROR_CODE_ALIGNMENT",
            Self::BadPacket => "ERROR_CODE_BAD_PACKET",
        };
        f.write_str(name)
    }
}

/// Caller-sized buffer of end-of-vector positions.
///
/// Holds at most `limit` positions; further positions are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EovPositions {
    positions: Vec<usize>,
    limit: usize,
}

impl EovPositions {
    /// Create a buffer for up to `limit` positions
    pub fn new(limit: usize) -> Self {
        Self {
            positions: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Record a position; false when the buffer is full
    pub fn push(&mut self, position: usize) -> bool {
        if self.positions.len() >= self.limit {
            return false;
        }
        self.positions.push(position);
        true
    }

    /// Recorded positions
    pub fn as_slice(&self) -> &[usize] {
        &self.positions
    }

    /// Number of recorded positions
    pub fn count(&self) -> usize {
        self.positions.len()
    }

    /// Maximum number of positions
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Forget recorded positions, keeping the allocation
    pub fn clear(&mut self) {
        self.positions.clear();
    }
}

/// Metadata filled by every `recv` call
#[derive(Debug, Clone, Default)]
pub struct RxMetadata {
    /// Whether `time_spec` is valid
    pub has_time_spec: bool,
    /// Time of the first sample returned
    pub time_spec: TimeSpec,
    /// The current packet has samples left for the next call
    pub more_fragments: bool,
    /// Samples of the current packet consumed by earlier calls
    pub fragment_offset: usize,
    /// First packet of a burst
    pub start_of_burst: bool,
    /// Last packet of a burst
    pub end_of_burst: bool,
    /// Optional end-of-vector positions, relative to the returned samples
    pub eov_positions: Option<EovPositions>,
    /// Error condition of this call
    pub error_code: RxErrorCode,
    /// With `Overflow`: a sequence gap rather than buffer saturation
    pub out_of_sequence: bool,
}

impl RxMetadata {
    /// Metadata with an end-of-vector buffer of `limit` positions
    pub fn with_eov_capacity(limit: usize) -> Self {
        Self {
            eov_positions: Some(EovPositions::new(limit)),
            ..Self::default()
        }
    }

    /// Clear every field, keeping the caller's end-of-vector buffer
    pub fn reset(&mut self) {
        let mut eov = self.eov_positions.take();
        if let Some(eov) = eov.as_mut() {
            eov.clear();
        }
        *self = Self {
            eov_positions: eov,
            ..Self::default()
        };
    }

    /// Number of end-of-vector positions returned
    pub fn eov_positions_count(&self) -> usize {
        self.eov_positions.as_ref().map_or(0, EovPositions::count)
    }

    /// Device-side buffer saturation
    pub fn is_overflow(&self) -> bool {
        self.error_code == RxErrorCode::Overflow && !self.out_of_sequence
    }

    /// Packets lost or reordered between device and host
    pub fn is_sequence_error(&self) -> bool {
        self.error_code == RxErrorCode::Overflow && self.out_of_sequence
    }

    /// Human readable description of the error code
    pub fn strerror(&self) -> String {
        let detail = match self.error_code {
            RxErrorCode::None => "no error",
            RxErrorCode::Timeout => "no packet received, implementation timed out",
            RxErrorCode::LateCommand => "a stream command was issued in the past",
            RxErrorCode::BrokenChain => "expected another stream command",
            RxErrorCode::Overflow if self.out_of_sequence => {
                "a packet was dropped or received out of sequence"
            }
            RxErrorCode::Overflow => "an internal receive buffer has filled",
            RxErrorCode::Alignment => "multi-channel alignment failed",
            RxErrorCode::BadPacket => "the packet could not be parsed",
        };
        format!("{}: {}", self.error_code, detail)
    }

    /// Pretty representation; `compact` omits cleared fields
    pub fn to_pp_string(&self, compact: bool) -> String {
        let mut out = String::new();
        if !compact || self.has_time_spec {
            out.push_str(&format!(
                "Time: {} ({}), ",
                self.time_spec,
                if self.has_time_spec { "valid" } else { "invalid" }
            ));
        }
        if !compact || self.more_fragments {
            out.push_str(&format!(
                "More fragments: {}, Fragment offset: {}, ",
                self.more_fragments, self.fragment_offset
            ));
        }
        if !compact || self.start_of_burst {
            out.push_str(&format!("Start of burst: {}, ", self.start_of_burst));
        }
        if !compact || self.end_of_burst {
            out.push_str(&format!("End of burst: {}, ", self.end_of_burst));
        }
        if !compact || self.eov_positions_count() > 0 {
            out.push_str(&format!("EOV positions: {}, ", self.eov_positions_count()));
        }
        if !compact || self.error_code != RxErrorCode::None {
            out.push_str(&format!("Error code: {}, ", self.error_code));
        }
        if !compact || self.out_of_sequence {
            out.push_str(&format!("Out of sequence: {}, ", self.out_of_sequence));
        }
        out.trim_end_matches(", ").to_string()
    }
}

/// Metadata supplied to every `send` call
#[derive(Debug, Clone, Default)]
pub struct TxMetadata {
    /// Whether `time_spec` is valid
    pub has_time_spec: bool,
    /// Time to transmit the first sample
    pub time_spec: TimeSpec,
    /// First packet of a burst
    pub start_of_burst: bool,
    /// Last packet of a burst
    pub end_of_burst: bool,
    /// Sample indices (exclusive ends) that close a vector
    pub eov_positions: Vec<usize>,
}

impl TxMetadata {
    /// A complete burst: start and end flags set
    pub fn burst() -> Self {
        Self {
            start_of_burst: true,
            end_of_burst: true,
            ..Self::default()
        }
    }

    /// Schedule the first sample at `time`
    pub fn at(mut self, time: TimeSpec) -> Self {
        self.has_time_spec = true;
        self.time_spec = time;
        self
    }
}

/// Asynchronous event code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AsyncEventCode {
    /// A burst was transmitted successfully
    BurstAck = 0x1,
    /// The device ran out of samples between packets
    Underflow = 0x2,
    /// Packet loss between host and device
    SeqError = 0x4,
    /// A timed packet arrived after its time
    TimeError = 0x8,
    /// The device ran out of samples inside a packet
    UnderflowInPacket = 0x10,
    /// Packet loss inside a burst
    SeqErrorInBurst = 0x20,
    /// Opaque device payload
    UserPayload = 0x40,
}

impl AsyncEventCode {
    /// Decode a wire value
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0x1 => Some(Self::BurstAck),
            0x2 => Some(Self::Underflow),
            0x4 => Some(Self::SeqError),
            0x8 => Some(Self::TimeError),
            0x10 => Some(Self::UnderflowInPacket),
            0x20 => Some(Self::SeqErrorInBurst),
            0x40 => Some(Self::UserPayload),
            _ => None,
        }
    }

    /// Wire value
    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// Asynchronous event raised by the transmit path of a device
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncMetadata {
    /// Streamer-relative channel index
    pub channel: usize,
    /// Whether `time_spec` is valid
    pub has_time_spec: bool,
    /// Time of the event
    pub time_spec: TimeSpec,
    /// What happened
    pub event_code: AsyncEventCode,
    /// Opaque payload words
    pub user_payload: [u32; 4],
}
