//! Receive streamer
//!
//! Turns wire packets from one transport per channel into caller buffers.
//! Each call reports exactly one condition through [`RxMetadata`]; only
//! caller misuse is an `Err`.
//!
//! - Packets larger than the caller's buffer are delivered in fragments
//! - Channels are aligned on packet timestamps before samples are copied
//! - A condition met after samples were gathered is held for the next call

use super::convert::{self, HostSample, OtwFormat};
use super::metadata::{RxErrorCode, RxMetadata};
use super::stream_cmd::{StreamCmd, StreamMode};
use super::wire::{self, HEADER_LEN, PacketHeader, PacketType};
use crate::core::types::TimeSpec;
use crate::error::{Error, Result};
use crate::transport::{ManagedRecvBuffer, ZeroCopyTransport};
use std::sync::Arc;
use std::time::Duration;

/// Realignment attempts per channel before reporting `Alignment`
const ALIGN_ATTEMPTS_PER_CHANNEL: usize = 4;

/// Wait for a send frame when issuing a stream command
const CMD_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Host-side view of the device's streaming state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// No stream command outstanding
    #[default]
    Idle,
    /// Streaming under the given mode
    Streaming(StreamMode),
}

/// A condition that ends a receive
#[derive(Debug, Clone, Copy, PartialEq)]
struct Condition {
    code: RxErrorCode,
    out_of_sequence: bool,
    time: Option<TimeSpec>,
}

impl Condition {
    fn new(code: RxErrorCode) -> Self {
        Self {
            code,
            out_of_sequence: false,
            time: None,
        }
    }

    fn apply(&self, md: &mut RxMetadata) {
        md.error_code = self.code;
        md.out_of_sequence = self.out_of_sequence;
        if let Some(time) = self.time {
            md.has_time_spec = true;
            md.time_spec = time;
        }
    }
}

/// A data packet held between calls
struct Pending {
    buff: ManagedRecvBuffer,
    header: PacketHeader,
    nsamps: usize,
    offset: usize,
}

impl Pending {
    fn remaining(&self) -> usize {
        self.nsamps - self.offset
    }

    fn payload(&self) -> &[u8] {
        &self.buff.as_slice()[HEADER_LEN..HEADER_LEN + self.header.payload_len as usize]
    }
}

#[derive(Default)]
struct Channel {
    pending: Option<Pending>,
    next_seq: Option<u16>,
}

/// What one packet step delivered
#[derive(Debug, Clone, Copy, Default)]
struct Consumed {
    header: PacketHeader,
    /// Packet samples consumed before this step
    offset: usize,
    /// Samples copied by this step
    n: usize,
    /// The packet has no samples left
    exhausted: bool,
}

enum Packet {
    Data(PacketHeader),
    Status(RxErrorCode, PacketHeader),
}

/// Receive streamer over one transport per channel.
///
/// The device produces one sample per tick, so sample offsets inside a
/// packet convert to time at `tick_rate`.
pub struct RxStreamer {
    links: Vec<Arc<dyn ZeroCopyTransport>>,
    channels: Vec<Channel>,
    otw: OtwFormat,
    tick_rate: f64,
    spp: usize,
    state: StreamState,
    queued: Option<Condition>,
}

impl RxStreamer {
    /// Create a streamer; `spp` is the most samples one packet carries
    pub fn new(
        links: Vec<Arc<dyn ZeroCopyTransport>>,
        otw: OtwFormat,
        tick_rate: f64,
        spp: usize,
    ) -> Result<Self> {
        if links.is_empty() {
            return Err(Error::InvalidArgument(
                "a receive streamer needs at least one channel".into(),
            ));
        }
        if spp == 0 {
            return Err(Error::InvalidArgument("spp must be positive".into()));
        }
        let packet_len = HEADER_LEN + spp * otw.bytes_per_sample();
        if let Some(link) = links.iter().find(|l| l.recv_frame_size() < packet_len) {
            return Err(Error::InvalidArgument(format!(
                "{} samples of {} need {} byte frames, receive frames are {} bytes",
                spp,
                otw,
                packet_len,
                link.recv_frame_size()
            )));
        }

        let channels = links.iter().map(|_| Channel::default()).collect();
        Ok(Self {
            links,
            channels,
            otw,
            tick_rate,
            spp,
            state: StreamState::Idle,
            queued: None,
        })
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.links.len()
    }

    /// Most samples a single packet (and a single `one_packet` call) returns
    pub fn max_num_samps(&self) -> usize {
        self.spp
    }

    /// Current streaming state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Send a stream command to every channel.
    ///
    /// Fails when a channel has no free send frame. Channels before it have
    /// already taken the command, so the state follows the command whenever
    /// at least one channel did.
    pub fn issue_stream_cmd(&mut self, cmd: &StreamCmd) -> Result<()> {
        log::debug!(
            "Stream command {:?} (num_samps={}, now={}) on {} channel(s)",
            cmd.stream_mode,
            cmd.num_samps,
            cmd.stream_now,
            self.links.len()
        );
        let next = if cmd.is_start() {
            StreamState::Streaming(cmd.stream_mode)
        } else {
            StreamState::Idle
        };
        for ch in 0..self.links.len() {
            let Some(mut buff) = self.links[ch].get_send_buffer(CMD_SEND_TIMEOUT) else {
                if ch > 0 {
                    log::warn!("Stream command reached {} of {} channels", ch, self.links.len());
                    self.set_state(next);
                }
                return Err(Error::Other(format!(
                    "no send frame for a stream command on channel {}",
                    ch
                )));
            };
            let len = wire::encode_stream_cmd(cmd, self.tick_rate, buff.as_mut_slice())?;
            buff.commit(len);
            buff.release();
        }
        self.set_state(next);
        Ok(())
    }

    /// Receive up to `nsamps_per_buff` samples into every channel buffer.
    ///
    /// Returns the number of samples written to each buffer. `md` reports the
    /// first packet's time and start of burst, the last packet's end of burst,
    /// and whether the last packet has samples left.
    pub fn recv<S: HostSample>(
        &mut self,
        buffs: &mut [&mut [S]],
        nsamps_per_buff: usize,
        md: &mut RxMetadata,
        timeout: Duration,
        one_packet: bool,
    ) -> Result<usize> {
        if buffs.len() != self.links.len() {
            return Err(Error::InvalidArgument(format!(
                "expected {} channel buffers, got {}",
                self.links.len(),
                buffs.len()
            )));
        }
        if let Some(short) = buffs.iter().find(|b| b.len() < nsamps_per_buff) {
            return Err(Error::InvalidArgument(format!(
                "buffer of {} samples is shorter than nsamps_per_buff {}",
                short.len(),
                nsamps_per_buff
            )));
        }

        md.reset();
        if let Some(cond) = self.queued.take() {
            cond.apply(md);
            return Ok(0);
        }
        if nsamps_per_buff == 0 {
            self.poll(md, timeout);
            return Ok(0);
        }

        if let Err(cond) = self.align(timeout) {
            cond.apply(md);
            return Ok(0);
        }
        let first = self.consume(buffs, 0, nsamps_per_buff);
        md.has_time_spec = first.header.has_time;
        md.time_spec = self.packet_time(&first.header, first.offset);
        md.start_of_burst = first.header.sob && first.offset == 0;
        md.fragment_offset = first.offset;
        let mut total = first.n;
        Self::record_eov(md, &first, total);

        let mut last = first;
        while last.exhausted && !last.header.eob && !one_packet && total < nsamps_per_buff {
            match self.align(timeout) {
                Ok(()) => {}
                Err(cond) if cond.code == RxErrorCode::Timeout => break,
                Err(cond) => {
                    log::trace!("Holding {} for the next receive", cond.code);
                    self.queued = Some(cond);
                    break;
                }
            }
            if self.pending_starts_burst() {
                break;
            }
            last = self.consume(buffs, total, nsamps_per_buff - total);
            total += last.n;
            Self::record_eov(md, &last, total);
        }

        md.more_fragments = !last.exhausted;
        md.end_of_burst = last.exhausted && last.header.eob;
        if md.end_of_burst {
            self.set_state(StreamState::Idle);
        }
        Ok(total)
    }

    /// Metadata-only receive
    fn poll(&mut self, md: &mut RxMetadata, timeout: Duration) {
        match self.align(timeout) {
            Err(cond) if cond.code == RxErrorCode::Timeout => {}
            Err(cond) => cond.apply(md),
            Ok(()) => {
                let Some((header, offset, remaining)) = self.channels[0]
                    .pending
                    .as_ref()
                    .map(|p| (p.header, p.offset, p.remaining()))
                else {
                    return;
                };
                md.has_time_spec = header.has_time;
                md.time_spec = self.packet_time(&header, offset);
                md.start_of_burst = header.sob && offset == 0;
                md.fragment_offset = offset;
                if remaining == 0 {
                    // Nothing to hand out later, so consume it now
                    for channel in &mut self.channels {
                        channel.pending = None;
                    }
                    md.end_of_burst = header.eob;
                    if header.eob {
                        self.set_state(StreamState::Idle);
                    }
                } else {
                    md.more_fragments = true;
                }
            }
        }
    }

    /// Make sure every channel holds a data packet and all share a timestamp
    fn align(&mut self, timeout: Duration) -> std::result::Result<(), Condition> {
        let attempts = self.channels.len() * ALIGN_ATTEMPTS_PER_CHANNEL;
        for _ in 0..attempts {
            for ch in 0..self.channels.len() {
                self.fetch(ch, timeout)?;
            }
            if self.channels.len() == 1 {
                return Ok(());
            }

            // Compare the next unread sample, not the packet start
            let times: Vec<Option<u64>> = self
                .channels
                .iter()
                .map(|c| {
                    c.pending
                        .as_ref()
                        .filter(|p| p.header.has_time)
                        .map(|p| p.header.timestamp + p.offset as u64)
                })
                .collect();
            if times.iter().any(Option::is_none) {
                return Ok(());
            }
            let newest = times.iter().flatten().copied().max().unwrap_or(0);
            if times.iter().all(|t| *t == Some(newest)) {
                return Ok(());
            }
            for (ch, channel) in self.channels.iter_mut().enumerate() {
                if times[ch] != Some(newest) {
                    log::debug!(
                        "Channel {} packet at tick {:?} behind tick {}, dropping",
                        ch,
                        times[ch],
                        newest
                    );
                    channel.pending = None;
                }
            }
        }

        log::warn!("Could not align {} channels, dropping held packets", self.channels.len());
        for channel in &mut self.channels {
            channel.pending = None;
        }
        Err(Condition::new(RxErrorCode::Alignment))
    }

    /// Receive one packet on `ch` unless one is already held
    fn fetch(&mut self, ch: usize, timeout: Duration) -> std::result::Result<(), Condition> {
        if self.channels[ch].pending.is_some() {
            return Ok(());
        }
        let buff = self.links[ch]
            .get_recv_buffer(timeout)
            .ok_or(Condition::new(RxErrorCode::Timeout))?;

        let parsed = PacketHeader::decode(buff.as_slice()).and_then(|(header, payload)| {
            match header.pkt_type {
                PacketType::Data => Ok(Packet::Data(header)),
                PacketType::RxStatus => {
                    wire::decode_status(payload).map(|code| Packet::Status(code, header))
                }
                other => Err(Error::InvalidPacket(format!(
                    "{:?} packet on a receive link",
                    other
                ))),
            }
        });

        let header = match parsed {
            Ok(Packet::Data(header)) => header,
            Ok(Packet::Status(code, header)) => {
                log::debug!("Channel {} reported {}", ch, code);
                self.on_status(code);
                let mut cond = Condition::new(code);
                if header.has_time {
                    cond.time = Some(TimeSpec::from_ticks(header.timestamp as i64, self.tick_rate));
                }
                return Err(cond);
            }
            Err(e) => {
                log::warn!("Channel {}: {}", ch, e);
                return Err(Condition::new(RxErrorCode::BadPacket));
            }
        };

        let bps = self.otw.bytes_per_sample();
        if header.payload_len as usize % bps != 0 {
            log::warn!(
                "Channel {}: payload of {} bytes is not whole {} samples",
                ch,
                header.payload_len,
                self.otw
            );
            return Err(Condition::new(RxErrorCode::BadPacket));
        }

        let channel = &mut self.channels[ch];
        let expected = channel.next_seq.replace(header.seq.wrapping_add(1));
        channel.pending = Some(Pending {
            buff,
            header,
            nsamps: header.payload_len as usize / bps,
            offset: 0,
        });

        if let Some(expected) = expected
            && expected != header.seq
        {
            log::warn!(
                "Channel {}: sequence {} expected, got {}",
                ch,
                expected,
                header.seq
            );
            return Err(Condition {
                code: RxErrorCode::Overflow,
                out_of_sequence: true,
                time: None,
            });
        }
        Ok(())
    }

    /// Copy samples from the held packets into `buffs[..][at..]`
    fn consume<S: HostSample>(&mut self, buffs: &mut [&mut [S]], at: usize, max: usize) -> Consumed {
        let n = self
            .channels
            .iter()
            .filter_map(|c| c.pending.as_ref())
            .map(Pending::remaining)
            .min()
            .unwrap_or(0)
            .min(max);
        let Some((header, offset)) = self.channels[0].pending.as_ref().map(|p| (p.header, p.offset))
        else {
            return Consumed {
                exhausted: true,
                ..Consumed::default()
            };
        };

        let bps = self.otw.bytes_per_sample();
        let mut exhausted = true;
        for (channel, buff) in self.channels.iter_mut().zip(buffs.iter_mut()) {
            let Some(pending) = channel.pending.as_mut() else {
                continue;
            };
            let start = pending.offset * bps;
            convert::unpack(self.otw, &pending.payload()[start..], &mut buff[at..at + n]);
            pending.offset += n;
            if pending.remaining() == 0 {
                channel.pending = None;
            } else {
                exhausted = false;
            }
        }

        Consumed {
            header,
            offset,
            n,
            exhausted,
        }
    }

    fn pending_starts_burst(&self) -> bool {
        self.channels[0]
            .pending
            .as_ref()
            .is_some_and(|p| p.header.sob && p.offset == 0)
    }

    fn record_eov(md: &mut RxMetadata, step: &Consumed, position: usize) {
        if step.exhausted
            && step.header.eov
            && let Some(eov) = md.eov_positions.as_mut()
            && !eov.push(position)
        {
            log::trace!("End-of-vector buffer full, position {} dropped", position);
        }
    }

    fn packet_time(&self, header: &PacketHeader, offset: usize) -> TimeSpec {
        TimeSpec::from_ticks(header.timestamp as i64 + offset as i64, self.tick_rate)
    }

    fn on_status(&mut self, code: RxErrorCode) {
        match (code, self.state) {
            (RxErrorCode::LateCommand | RxErrorCode::BrokenChain, _) => {
                self.set_state(StreamState::Idle)
            }
            (RxErrorCode::Overflow, StreamState::Streaming(StreamMode::StartContinuous)) => {}
            (RxErrorCode::Overflow, _) => self.set_state(StreamState::Idle),
            _ => {}
        }
    }

    fn set_state(&mut self, state: StreamState) {
        if self.state != state {
            log::debug!("Receive state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::convert::pack;
    use crate::transport::{LoopbackTransport, TransportParams};
    use num_complex::Complex;

    const TICK_RATE: f64 = 1e6;

    fn params() -> TransportParams {
        TransportParams {
            recv_frame_size: 1024,
            send_frame_size: 256,
            num_recv_frames: 8,
            num_send_frames: 4,
        }
    }

    /// Streamer over `n` loopback links plus the device ends
    fn streamer(n: usize, spp: usize) -> (RxStreamer, Vec<LoopbackTransport>) {
        let mut host: Vec<Arc<dyn ZeroCopyTransport>> = Vec::new();
        let mut dev = Vec::new();
        for _ in 0..n {
            let (h, d) = LoopbackTransport::pair(&params()).unwrap();
            host.push(Arc::new(h));
            dev.push(d);
        }
        (RxStreamer::new(host, OtwFormat::Sc16, TICK_RATE, spp).unwrap(), dev)
    }

    fn send_data(dev: &LoopbackTransport, seq: u16, ts: u64, samples: &[i16], sob: bool, eob: bool) {
        let mut buff = dev.get_send_buffer(Duration::ZERO).unwrap();
        let host: Vec<Complex<i16>> = samples.iter().map(|&v| Complex::new(v, -v)).collect();
        let frame = buff.as_mut_slice();
        let bytes = pack(OtwFormat::Sc16, &host, &mut frame[HEADER_LEN..]);
        let header = PacketHeader {
            pkt_type: PacketType::Data,
            has_time: true,
            sob,
            eob,
            eov: false,
            seq,
            payload_len: bytes as u32,
            timestamp: ts,
        };
        header.encode(frame).unwrap();
        buff.commit(HEADER_LEN + bytes);
    }

    fn send_status(dev: &LoopbackTransport, code: RxErrorCode) {
        let mut buff = dev.get_send_buffer(Duration::ZERO).unwrap();
        let len = wire::encode_status(code, Some(5), buff.as_mut_slice()).unwrap();
        buff.commit(len);
    }

    fn ramp(start: i16, n: usize) -> Vec<i16> {
        (0..n as i16).map(|i| start + i).collect()
    }

    const WAIT: Duration = Duration::from_millis(20);

    #[test]
    fn test_rejects_bad_buffers() {
        let (mut rx, _dev) = streamer(2, 100);
        let mut md = RxMetadata::default();
        let mut a = vec![Complex::<f32>::default(); 10];
        assert!(rx.recv(&mut [&mut a[..]], 10, &mut md, WAIT, false).is_err());

        let mut b = vec![Complex::<f32>::default(); 5];
        assert!(rx
            .recv(&mut [&mut a[..], &mut b[..]], 10, &mut md, WAIT, false)
            .is_err());
    }

    #[test]
    fn test_rejects_spp_larger_than_frame() {
        let (h, _d) = LoopbackTransport::pair(&params()).unwrap();
        let links: Vec<Arc<dyn ZeroCopyTransport>> = vec![Arc::new(h)];
        assert!(RxStreamer::new(links, OtwFormat::Sc16, TICK_RATE, 1000).is_err());
    }

    #[test]
    fn test_timeout_and_poll() {
        let (mut rx, _dev) = streamer(1, 100);
        let mut md = RxMetadata::default();
        let mut buf = vec![Complex::<i16>::default(); 10];

        assert_eq!(rx.recv(&mut [&mut buf[..]], 10, &mut md, WAIT, false).unwrap(), 0);
        assert_eq!(md.error_code, RxErrorCode::Timeout);

        assert_eq!(rx.recv(&mut [&mut buf[..]], 0, &mut md, WAIT, false).unwrap(), 0);
        assert_eq!(md.error_code, RxErrorCode::None);
    }

    #[test]
    fn test_fragmented_packet() {
        let (mut rx, dev) = streamer(1, 100);
        send_data(&dev[0], 0, 1000, &ramp(0, 100), true, true);

        let mut md = RxMetadata::default();
        let mut buf = vec![Complex::<i16>::default(); 60];
        let n = rx.recv(&mut [&mut buf[..]], 60, &mut md, WAIT, false).unwrap();
        assert_eq!(n, 60);
        assert!(md.more_fragments);
        assert_eq!(md.fragment_offset, 0);
        assert!(md.start_of_burst);
        assert!(!md.end_of_burst);
        assert_eq!(md.time_spec.to_ticks(TICK_RATE), 1000);

        let n = rx.recv(&mut [&mut buf[..]], 60, &mut md, WAIT, false).unwrap();
        assert_eq!(n, 40);
        assert!(!md.more_fragments);
        assert_eq!(md.fragment_offset, 60);
        assert!(!md.start_of_burst);
        assert!(md.end_of_burst);
        assert_eq!(md.time_spec.to_ticks(TICK_RATE), 1060);
        assert_eq!(buf[0], Complex::new(60, -60));
    }

    #[test]
    fn test_multi_packet_call_and_one_packet() {
        let (mut rx, dev) = streamer(1, 50);
        send_data(&dev[0], 0, 0, &ramp(0, 50), true, false);
        send_data(&dev[0], 1, 50, &ramp(50, 50), false, false);
        send_data(&dev[0], 2, 100, &ramp(100, 50), false, true);

        let mut md = RxMetadata::default();
        let mut buf = vec![Complex::<i16>::default(); 200];
        let n = rx.recv(&mut [&mut buf[..]], 200, &mut md, WAIT, true).unwrap();
        assert_eq!(n, 50);
        assert!(md.start_of_burst);

        let n = rx.recv(&mut [&mut buf[..]], 200, &mut md, WAIT, false).unwrap();
        assert_eq!(n, 100);
        assert!(!md.start_of_burst);
        assert!(md.end_of_burst);
        assert_eq!(buf[99], Complex::new(149, -149));
    }

    #[test]
    fn test_later_error_is_held_for_next_call() {
        let (mut rx, dev) = streamer(1, 50);
        send_data(&dev[0], 0, 0, &ramp(0, 50), true, false);
        send_status(&dev[0], RxErrorCode::BrokenChain);

        let mut md = RxMetadata::default();
        let mut buf = vec![Complex::<i16>::default(); 100];
        assert_eq!(rx.recv(&mut [&mut buf[..]], 100, &mut md, WAIT, false).unwrap(), 50);
        assert_eq!(md.error_code, RxErrorCode::None);

        assert_eq!(rx.recv(&mut [&mut buf[..]], 100, &mut md, WAIT, false).unwrap(), 0);
        assert_eq!(md.error_code, RxErrorCode::BrokenChain);
        assert!(md.has_time_spec);
    }

    #[test]
    fn test_sequence_gap_reports_out_of_sequence() {
        let (mut rx, dev) = streamer(1, 50);
        send_data(&dev[0], 0, 0, &ramp(0, 50), true, false);
        send_data(&dev[0], 2, 100, &ramp(0, 50), false, false);

        let mut md = RxMetadata::default();
        let mut buf = vec![Complex::<i16>::default(); 50];
        assert_eq!(rx.recv(&mut [&mut buf[..]], 50, &mut md, WAIT, false).unwrap(), 50);

        assert_eq!(rx.recv(&mut [&mut buf[..]], 50, &mut md, WAIT, false).unwrap(), 0);
        assert!(md.is_sequence_error());

        // The packet after the gap is still delivered
        assert_eq!(rx.recv(&mut [&mut buf[..]], 50, &mut md, WAIT, false).unwrap(), 50);
        assert_eq!(md.time_spec.to_ticks(TICK_RATE), 100);
    }

    #[test]
    fn test_channels_realign_on_timestamp() {
        let (mut rx, dev) = streamer(2, 10);
        send_data(&dev[0], 0, 0, &ramp(0, 10), false, false);
        send_data(&dev[0], 1, 10, &ramp(10, 10), false, false);
        send_data(&dev[1], 0, 10, &ramp(10, 10), false, false);

        let mut md = RxMetadata::default();
        let mut a = vec![Complex::<i16>::default(); 10];
        let mut b = vec![Complex::<i16>::default(); 10];
        let n = rx
            .recv(&mut [&mut a[..], &mut b[..]], 10, &mut md, WAIT, false)
            .unwrap();
        assert_eq!(n, 10);
        assert_eq!(md.time_spec.to_ticks(TICK_RATE), 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bad_packet() {
        let (mut rx, dev) = streamer(1, 50);
        let mut buff = dev[0].get_send_buffer(Duration::ZERO).unwrap();
        buff.as_mut_slice()[..HEADER_LEN].fill(0xff);
        buff.commit(HEADER_LEN);
        drop(buff);

        let mut md = RxMetadata::default();
        let mut buf = vec![Complex::<i16>::default(); 50];
        rx.recv(&mut [&mut buf[..]], 50, &mut md, WAIT, false).unwrap();
        assert_eq!(md.error_code, RxErrorCode::BadPacket);
    }

    #[test]
    fn test_state_follows_commands_and_status() {
        let (mut rx, dev) = streamer(1, 50);
        rx.issue_stream_cmd(&StreamCmd::num_samps_and_more(100)).unwrap();
        assert_eq!(rx.state(), StreamState::Streaming(StreamMode::NumSampsAndMore));

        let cmd_frame = dev[0].get_recv_buffer(WAIT).unwrap();
        let (header, payload) = PacketHeader::decode(cmd_frame.as_slice()).unwrap();
        assert_eq!(
            wire::decode_stream_cmd(&header, payload, TICK_RATE).unwrap().num_samps,
            100
        );

        send_status(&dev[0], RxErrorCode::Overflow);
        let mut md = RxMetadata::default();
        let mut buf = vec![Complex::<i16>::default(); 50];
        rx.recv(&mut [&mut buf[..]], 50, &mut md, WAIT, false).unwrap();
        assert!(md.is_overflow());
        assert_eq!(rx.state(), StreamState::Idle);

        rx.issue_stream_cmd(&StreamCmd::start_continuous()).unwrap();
        send_status(&dev[0], RxErrorCode::Overflow);
        rx.recv(&mut [&mut buf[..]], 50, &mut md, WAIT, false).unwrap();
        assert_eq!(rx.state(), StreamState::Streaming(StreamMode::StartContinuous));
    }

    #[test]
    fn test_unequal_packets_stay_aligned() {
        let (mut rx, dev) = streamer(2, 100);
        send_data(&dev[0], 0, 0, &ramp(0, 100), true, true);
        send_data(&dev[1], 0, 0, &ramp(0, 50), true, false);
        send_data(&dev[1], 1, 50, &ramp(50, 50), false, true);

        let mut md = RxMetadata::default();
        let mut a = vec![Complex::<i16>::default(); 100];
        let mut b = vec![Complex::<i16>::default(); 100];
        let n1 = rx
            .recv(&mut [&mut a[..], &mut b[..]], 100, &mut md, WAIT, false)
            .unwrap();
        assert_eq!(n1, 50);
        assert!(md.more_fragments);
        assert_eq!(a[..50], b[..50]);

        let n2 = rx
            .recv(&mut [&mut a[..], &mut b[..]], 100, &mut md, WAIT, false)
            .unwrap();
        assert_eq!(md.error_code, RxErrorCode::None);
        assert_eq!(n1 + n2, 100);
        assert_eq!(md.time_spec.to_ticks(TICK_RATE), 50);
        assert!(md.end_of_burst);
        assert_eq!(a[..50], b[..50]);
        assert_eq!(a[0], Complex::new(50, -50));
    }

    #[test]
    fn test_persistent_mismatch_reports_alignment() {
        let (mut rx, dev) = streamer(2, 10);
        // Channel 1 always runs 5 ticks behind channel 0
        for i in 0..8u16 {
            let ts = i as u64 * 10;
            send_data(&dev[0], i, ts + 5, &ramp(0, 10), false, false);
            send_data(&dev[1], i, ts, &ramp(0, 10), false, false);
        }

        let mut md = RxMetadata::default();
        let mut a = vec![Complex::<i16>::default(); 10];
        let mut b = vec![Complex::<i16>::default(); 10];
        let n = rx
            .recv(&mut [&mut a[..], &mut b[..]], 10, &mut md, WAIT, false)
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(md.error_code, RxErrorCode::Alignment);
    }

    #[test]
    fn test_partial_command_fan_out_updates_state() {
        let mut host: Vec<Arc<dyn ZeroCopyTransport>> = Vec::new();
        let mut dev = Vec::new();
        for _ in 0..2 {
            let (h, d) = LoopbackTransport::pair(&params()).unwrap();
            host.push(Arc::new(h));
            dev.push(d);
        }
        let second = Arc::clone(&host[1]);
        let mut rx = RxStreamer::new(host, OtwFormat::Sc16, TICK_RATE, 50).unwrap();

        // Hold every send frame of channel 1
        let held: Vec<_> = (0..params().num_send_frames)
            .map(|_| second.get_send_buffer(Duration::ZERO).unwrap())
            .collect();
        assert!(rx.issue_stream_cmd(&StreamCmd::start_continuous()).is_err());
        assert_eq!(rx.state(), StreamState::Streaming(StreamMode::StartContinuous));
        assert!(dev[0].get_recv_buffer(WAIT).is_some());
        assert!(dev[1].get_recv_buffer(Duration::ZERO).is_none());
        drop(held);
    }
}
