//! Wire packet codec
//!
//! # Packet Format
//!
//! Every frame carries exactly one packet: a fixed header followed by the
//! payload.
//!
//! ```text
//! ┌──────┬───────┬──────────┬─────────────┬────────────────┬──────────────┐
//! │ Type │ Flags │ Sequence │ Payload len │ Timestamp      │ Payload      │
//! │ u8   │ u8    │ u16      │ u32 (bytes) │ u64 (ticks)    │ variable     │
//! └──────┴───────┴──────────┴─────────────┴────────────────┴──────────────┘
//!   0      1       2..4       4..8          8..16            16..
//! ```
//!
//! All multi-byte fields are big-endian (network byte order).
//!
//! ## Flags
//!
//! - bit 0: timestamp valid
//! - bit 1: start of burst
//! - bit 2: end of burst
//! - bit 3: end of vector
//!
//! ## Packet Types
//!
//! | Type | Direction | Payload |
//! |---|---|---|
//! | 1 Data | both | samples in the stream's wire format |
//! | 2 Stream command | host → device | mode u8, stream_now u8, 2 reserved, num_samps u64 |
//! | 3 Rx status | device → host | error code u32 |
//! | 4 Async event | device → host | channel u32, event code u32, 4 × u32 payload |
//!
//! Sequence numbers count data packets per channel and wrap at 16 bits.
//!
//! ## Error Handling
//!
//! - **Short frame, unknown type, payload length past the frame end**:
//!   `Error::InvalidPacket`, surfaced as `BAD_PACKET` by the receive streamer
//! - **Frame too small to encode into**: `Error::InvalidArgument`

use crate::core::types::TimeSpec;
use crate::error::{Error, Result};
use crate::streaming::metadata::{AsyncEventCode, RxErrorCode};
use crate::streaming::stream_cmd::{StreamCmd, StreamMode};

/// Header length in bytes
pub const HEADER_LEN: usize = 16;

const FLAG_HAS_TIME: u8 = 0x01;
const FLAG_SOB: u8 = 0x02;
const FLAG_EOB: u8 = 0x04;
const FLAG_EOV: u8 = 0x08;

const STREAM_CMD_PAYLOAD_LEN: usize = 12;
const STATUS_PAYLOAD_LEN: usize = 4;
const EVENT_PAYLOAD_LEN: usize = 24;

/// Packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PacketType {
    /// Sample data
    #[default]
    Data = 1,
    /// Stream command
    StreamCmd = 2,
    /// Receive status / error report
    RxStatus = 3,
    /// Asynchronous transmit event
    AsyncEvent = 4,
}

impl PacketType {
    fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Data),
            2 => Some(Self::StreamCmd),
            3 => Some(Self::RxStatus),
            4 => Some(Self::AsyncEvent),
            _ => None,
        }
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// Packet type
    pub pkt_type: PacketType,
    /// `timestamp` is valid
    pub has_time: bool,
    /// Start of burst
    pub sob: bool,
    /// End of burst
    pub eob: bool,
    /// End of vector
    pub eov: bool,
    /// Data packet sequence number
    pub seq: u16,
    /// Payload length in bytes
    pub payload_len: u32,
    /// Timestamp in device ticks
    pub timestamp: u64,
}

impl PacketHeader {
    /// Header of the given type with every flag cleared
    pub fn new(pkt_type: PacketType) -> Self {
        Self {
            pkt_type,
            ..Self::default()
        }
    }

    /// Attach a timestamp
    pub fn with_time(mut self, timestamp: u64) -> Self {
        self.has_time = true;
        self.timestamp = timestamp;
        self
    }

    /// Write the header into the first [`HEADER_LEN`] bytes of `out`
    pub fn encode(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < HEADER_LEN {
            return Err(Error::InvalidArgument(format!(
                "frame of {} bytes cannot hold a packet header",
                out.len()
            )));
        }
        let mut flags = 0u8;
        if self.has_time {
            flags |= FLAG_HAS_TIME;
        }
        if self.sob {
            flags |= FLAG_SOB;
        }
        if self.eob {
            flags |= FLAG_EOB;
        }
        if self.eov {
            flags |= FLAG_EOV;
        }
        out[0] = self.pkt_type as u8;
        out[1] = flags;
        out[2..4].copy_from_slice(&self.seq.to_be_bytes());
        out[4..8].copy_from_slice(&self.payload_len.to_be_bytes());
        out[8..16].copy_from_slice(&self.timestamp.to_be_bytes());
        Ok(())
    }

    /// Parse a frame into its header and payload
    pub fn decode(frame: &[u8]) -> Result<(Self, &[u8])> {
        if frame.len() < HEADER_LEN {
            return Err(Error::InvalidPacket(format!(
                "frame of {} bytes is shorter than the header",
                frame.len()
            )));
        }
        let pkt_type = PacketType::from_wire(frame[0])
            .ok_or_else(|| Error::InvalidPacket(format!("unknown packet type {:#04x}", frame[0])))?;
        let flags = frame[1];
        let seq = u16::from_be_bytes([frame[2], frame[3]]);
        let payload_len = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&frame[8..16]);
        let timestamp = u64::from_be_bytes(ts);

        let end = HEADER_LEN + payload_len as usize;
        if end > frame.len() {
            return Err(Error::InvalidPacket(format!(
                "payload length {} exceeds frame of {} bytes",
                payload_len,
                frame.len()
            )));
        }

        let header = Self {
            pkt_type,
            has_time: flags & FLAG_HAS_TIME != 0,
            sob: flags & FLAG_SOB != 0,
            eob: flags & FLAG_EOB != 0,
            eov: flags & FLAG_EOV != 0,
            seq,
            payload_len,
            timestamp,
        };
        Ok((header, &frame[HEADER_LEN..end]))
    }
}

/// Write a complete packet (header + payload); returns the packet length
pub fn encode_packet(header: &PacketHeader, payload: &[u8], out: &mut [u8]) -> Result<usize> {
    let total = HEADER_LEN + payload.len();
    if out.len() < total {
        return Err(Error::InvalidArgument(format!(
            "packet of {} bytes does not fit a {} byte frame",
            total,
            out.len()
        )));
    }
    let mut header = *header;
    header.payload_len = payload.len() as u32;
    header.encode(out)?;
    out[HEADER_LEN..total].copy_from_slice(payload);
    Ok(total)
}

/// Encode a stream command packet
pub fn encode_stream_cmd(cmd: &StreamCmd, tick_rate: f64, out: &mut [u8]) -> Result<usize> {
    let mut header = PacketHeader::new(PacketType::StreamCmd);
    if !cmd.stream_now {
        header = header.with_time(cmd.time_spec.to_ticks(tick_rate).max(0) as u64);
    }
    let mut payload = [0u8; STREAM_CMD_PAYLOAD_LEN];
    payload[0] = cmd.stream_mode.to_wire();
    payload[1] = cmd.stream_now as u8;
    payload[4..12].copy_from_slice(&cmd.num_samps.to_be_bytes());
    encode_packet(&header, &payload, out)
}

/// Decode a stream command payload
pub fn decode_stream_cmd(header: &PacketHeader, payload: &[u8], tick_rate: f64) -> Result<StreamCmd> {
    if payload.len() != STREAM_CMD_PAYLOAD_LEN {
        return Err(Error::InvalidPacket(format!(
            "stream command payload of {} bytes",
            payload.len()
        )));
    }
    let stream_mode = StreamMode::from_wire(payload[0])
        .ok_or_else(|| Error::InvalidPacket(format!("unknown stream mode {:#04x}", payload[0])))?;
    let mut n = [0u8; 8];
    n.copy_from_slice(&payload[4..12]);
    let stream_now = payload[1] != 0 || !header.has_time;
    let time_spec = if header.has_time {
        TimeSpec::from_ticks(header.timestamp as i64, tick_rate)
    } else {
        TimeSpec::default()
    };
    Ok(StreamCmd {
        stream_mode,
        num_samps: u64::from_be_bytes(n),
        stream_now,
        time_spec,
    })
}

/// Encode a receive status packet
pub fn encode_status(code: RxErrorCode, timestamp: Option<u64>, out: &mut [u8]) -> Result<usize> {
    let mut header = PacketHeader::new(PacketType::RxStatus);
    if let Some(ts) = timestamp {
        header = header.with_time(ts);
    }
    encode_packet(&header, &code.to_wire().to_be_bytes(), out)
}

/// Decode a receive status payload
pub fn decode_status(payload: &[u8]) -> Result<RxErrorCode> {
    if payload.len() != STATUS_PAYLOAD_LEN {
        return Err(Error::InvalidPacket(format!(
            "status payload of {} bytes",
            payload.len()
        )));
    }
    let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    RxErrorCode::from_wire(raw)
        .ok_or_else(|| Error::InvalidPacket(format!("unknown status code {:#x}", raw)))
}

/// Async event payload as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPayload {
    /// Device-side channel index
    pub channel: u32,
    /// Event code
    pub code: AsyncEventCode,
    /// Opaque words
    pub user_payload: [u32; 4],
}

/// Encode an async event packet
pub fn encode_event(event: &EventPayload, timestamp: Option<u64>, out: &mut [u8]) -> Result<usize> {
    let mut header = PacketHeader::new(PacketType::AsyncEvent);
    if let Some(ts) = timestamp {
        header = header.with_time(ts);
    }
    let mut payload = [0u8; EVENT_PAYLOAD_LEN];
    payload[0..4].copy_from_slice(&event.channel.to_be_bytes());
    payload[4..8].copy_from_slice(&event.code.to_wire().to_be_bytes());
    for (i, word) in event.user_payload.iter().enumerate() {
        let at = 8 + i * 4;
        payload[at..at + 4].copy_from_slice(&word.to_be_bytes());
    }
    encode_packet(&header, &payload, out)
}

/// Decode an async event payload
pub fn decode_event(payload: &[u8]) -> Result<EventPayload> {
    if payload.len() != EVENT_PAYLOAD_LEN {
        return Err(Error::InvalidPacket(format!(
            "event payload of {} bytes",
            payload.len()
        )));
    }
    let word = |at: usize| {
        u32::from_be_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
    };
    let raw_code = word(4);
    let code = AsyncEventCode::from_wire(raw_code)
        .ok_or_else(|| Error::InvalidPacket(format!("unknown event code {:#x}", raw_code)))?;
    Ok(EventPayload {
        channel: word(0),
        code,
        user_payload: [word(8), word(12), word(16), word(20)],
    })
}
