//! Transmit streamer
//!
//! Splits caller buffers into wire packets, one transport per channel, and
//! collects the device's asynchronous events on a background thread.

use super::convert::{self, HostSample, OtwFormat};
use super::metadata::{AsyncMetadata, TxMetadata};
use super::wire::{self, HEADER_LEN, PacketHeader, PacketType};
use crate::core::types::TimeSpec;
use crate::error::{Error, Result};
use crate::transport::{BoundedQueue, ManagedSendBuffer, ZeroCopyTransport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Events kept before the oldest is evicted
const ASYNC_QUEUE_DEPTH: usize = 1000;

/// Per-link wait of the event reader
const ASYNC_POLL: Duration = Duration::from_millis(2);

/// Transmit streamer over one transport per channel
pub struct TxStreamer {
    links: Vec<Arc<dyn ZeroCopyTransport>>,
    otw: OtwFormat,
    tick_rate: f64,
    spp: usize,
    seq: Vec<u16>,
    events: Arc<BoundedQueue<AsyncMetadata>>,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl TxStreamer {
    /// Create a streamer and start its event reader.
    ///
    /// `spp` caps the samples per packet; the send frame size may cap it
    /// further.
    pub fn new(
        links: Vec<Arc<dyn ZeroCopyTransport>>,
        otw: OtwFormat,
        tick_rate: f64,
        spp: usize,
    ) -> Result<Self> {
        if links.is_empty() {
            return Err(Error::InvalidArgument(
                "a transmit streamer needs at least one channel".into(),
            ));
        }
        let frame_size = links.iter().map(|l| l.send_frame_size()).min().unwrap_or(0);
        let spp = spp.min(frame_size.saturating_sub(HEADER_LEN) / otw.bytes_per_sample());
        if spp == 0 {
            return Err(Error::InvalidArgument(format!(
                "send frames of {} bytes cannot carry {} samples",
                frame_size, otw
            )));
        }

        let events = Arc::new(BoundedQueue::new(ASYNC_QUEUE_DEPTH));
        let shutdown = Arc::new(AtomicBool::new(false));
        let reader = Self::start_async_reader(
            links.clone(),
            Arc::clone(&events),
            Arc::clone(&shutdown),
            tick_rate,
        )?;

        Ok(Self {
            seq: vec![0; links.len()],
            links,
            otw,
            tick_rate,
            spp,
            events,
            shutdown,
            reader: Some(reader),
        })
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.links.len()
    }

    /// Most samples per wire packet
    pub fn max_num_samps(&self) -> usize {
        self.spp
    }

    /// Send `nsamps_per_buff` samples from every channel buffer.
    ///
    /// Requests longer than [`max_num_samps`](Self::max_num_samps) or crossing
    /// an end-of-vector position go out as several packets. Start of burst and
    /// the timestamp ride on the first packet only, end of burst on the last.
    /// Returns the samples sent before a frame acquisition timed out.
    pub fn send<S: HostSample>(
        &mut self,
        buffs: &[&[S]],
        nsamps_per_buff: usize,
        md: &TxMetadata,
        timeout: Duration,
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

        if nsamps_per_buff == 0 {
            if md.start_of_burst || md.end_of_burst {
                let header = self.data_header(md, true, true, false);
                if !self.send_packet(buffs, header, 0, 0, timeout) {
                    log::debug!("Timed out sending an empty burst marker");
                }
            }
            return Ok(0);
        }

        let mut eov: Vec<usize> = md
            .eov_positions
            .iter()
            .copied()
            .filter(|&p| p > 0 && p <= nsamps_per_buff)
            .collect();
        eov.sort_unstable();
        eov.dedup();

        let mut pos = 0;
        while pos < nsamps_per_buff {
            let next_eov = eov.iter().copied().find(|&p| p > pos);
            let end = (pos + self.spp).min(next_eov.unwrap_or(nsamps_per_buff));
            let header = self.data_header(
                md,
                pos == 0,
                end == nsamps_per_buff,
                next_eov == Some(end),
            );
            if !self.send_packet(buffs, header, pos, end, timeout) {
                log::debug!("Send timed out after {} of {} samples", pos, nsamps_per_buff);
                return Ok(pos);
            }
            pos = end;
        }
        Ok(nsamps_per_buff)
    }

    /// Next asynchronous event, in the order the device raised them
    pub fn recv_async_msg(&self, timeout: Duration) -> Option<AsyncMetadata> {
        if timeout.is_zero() {
            self.events.pop_try()
        } else {
            self.events.pop_wait_timeout(timeout)
        }
    }

    fn data_header(&self, md: &TxMetadata, first: bool, last: bool, eov: bool) -> PacketHeader {
        let mut header = PacketHeader::new(PacketType::Data);
        header.sob = first && md.start_of_burst;
        header.eob = last && md.end_of_burst;
        header.eov = eov;
        if first && md.has_time_spec {
            header = header.with_time(md.time_spec.to_ticks(self.tick_rate).max(0) as u64);
        }
        header
    }

    /// Send samples `start..end` of every channel as one packet each.
    ///
    /// Frames for all channels are acquired before any is released, so a
    /// timeout leaves no channel ahead of the others.
    fn send_packet<S: HostSample>(
        &mut self,
        buffs: &[&[S]],
        header: PacketHeader,
        start: usize,
        end: usize,
        timeout: Duration,
    ) -> bool {
        let mut frames: Vec<ManagedSendBuffer> = Vec::with_capacity(self.links.len());
        for link in &self.links {
            match link.get_send_buffer(timeout) {
                Some(buff) => frames.push(buff),
                // Uncommitted frames go back to their pools on drop
                None => return false,
            }
        }

        for (ch, mut buff) in frames.into_iter().enumerate() {
            let frame = buff.as_mut_slice();
            let bytes = convert::pack(self.otw, &buffs[ch][start..end], &mut frame[HEADER_LEN..]);
            let mut header = header;
            header.seq = self.seq[ch];
            header.payload_len = bytes as u32;
            if let Err(e) = header.encode(frame) {
                log::error!("Channel {}: {}", ch, e);
                continue;
            }
            buff.commit(HEADER_LEN + bytes);
            buff.release();
            self.seq[ch] = self.seq[ch].wrapping_add(1);
            log::trace!(
                "Channel {} packet seq={} samples={} sob={} eob={}",
                ch,
                header.seq,
                end - start,
                header.sob,
                header.eob
            );
        }
        true
    }

    fn start_async_reader(
        links: Vec<Arc<dyn ZeroCopyTransport>>,
        events: Arc<BoundedQueue<AsyncMetadata>>,
        shutdown: Arc<AtomicBool>,
        tick_rate: f64,
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("tx-async-reader".to_string())
            .spawn(move || {
                log::debug!("Async event reader started for {} channel(s)", links.len());
                while !shutdown.load(Ordering::Relaxed) {
                    for (channel, link) in links.iter().enumerate() {
                        let Some(buff) = link.get_recv_buffer(ASYNC_POLL) else {
                            continue;
                        };
                        match parse_event(buff.as_slice(), channel, tick_rate) {
                            Ok(event) => {
                                log::trace!("Channel {} event {:?}", channel, event.event_code);
                                if let Some(evicted) = events.push_force(event) {
                                    log::warn!(
                                        "Async event queue full, dropped {:?} from channel {}",
                                        evicted.event_code,
                                        evicted.channel
                                    );
                                }
                            }
                            Err(e) => log::warn!("Channel {}: {}", channel, e),
                        }
                    }
                }
                log::debug!("Async event reader stopped");
            })?;
        Ok(handle)
    }
}

/// Decode an async event frame received on streamer channel `channel`
fn parse_event(frame: &[u8], channel: usize, tick_rate: f64) -> Result<AsyncMetadata> {
    let (header, payload) = PacketHeader::decode(frame)?;
    if header.pkt_type != PacketType::AsyncEvent {
        return Err(Error::InvalidPacket(format!(
            "{:?} packet on a transmit link",
            header.pkt_type
        )));
    }
    let event = wire::decode_event(payload)?;
    Ok(AsyncMetadata {
        channel,
        has_time_spec: header.has_time,
        time_spec: if header.has_time {
            TimeSpec::from_ticks(header.timestamp as i64, tick_rate)
        } else {
            TimeSpec::default()
        },
        event_code: event.code,
        user_payload: event.user_payload,
    })
}

impl Drop for TxStreamer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take()
            && let Err(e) = reader.join()
        {
            log::error!("Async event reader panicked: {:?}", e);
        }
    }
}
