//! Simulated transmit DSP chain
//!
//! One thread per channel. Consumes data packets from the host and raises
//! asynchronous events for what a real transmit path would notice.
//!
//! | Event | Raised when |
//! |---|---|
//! | `BurstAck` | a packet with end of burst was consumed |
//! | `Underflow` | a burst stalled longer than the underflow timeout |
//! | `UnderflowInPacket` | a payload ends inside a sample |
//! | `SeqError` / `SeqErrorInBurst` | a sequence number was skipped |
//! | `TimeError` | a timed packet arrived after its time (burst dropped) |
//! | `UserPayload` | injected through [`SimDevice`](super::SimDevice) |

use super::clock::SimClock;
use crate::streaming::convert::OtwFormat;
use crate::streaming::metadata::AsyncEventCode;
use crate::streaming::wire::{self, EventPayload, PacketHeader, PacketType};
use crate::transport::{BoundedQueue, LoopbackTransport, ZeroCopyTransport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest wait for a packet between checks for shutdown and stalls
const POLL: Duration = Duration::from_millis(2);

/// Transmit chain of one channel
pub(super) struct TxChain {
    pub channel: usize,
    pub link: LoopbackTransport,
    pub clock: Arc<SimClock>,
    pub shutdown: Arc<AtomicBool>,
    pub otw: OtwFormat,
    pub underflow_timeout: Duration,
    pub injections: Arc<BoundedQueue<[u32; 4]>>,
}

impl TxChain {
    pub fn run(self) {
        log::info!("Sim tx chain {} started", self.channel);

        let bps = self.otw.bytes_per_sample();
        let mut expected_seq: Option<u16> = None;
        let mut in_burst = false;
        let mut dropping = false;
        let mut last_packet = Instant::now();

        while !self.shutdown.load(Ordering::Relaxed) && !self.link.is_closed() {
            while let Some(payload) = self.injections.pop_try() {
                self.raise(AsyncEventCode::UserPayload, self.clock.now_ticks(), payload);
            }

            let Some(buff) = self.link.get_recv_buffer(POLL) else {
                if in_burst && last_packet.elapsed() > self.underflow_timeout {
                    log::debug!("Sim tx chain {}: burst stalled", self.channel);
                    self.raise(AsyncEventCode::Underflow, self.clock.now_ticks(), [0; 4]);
                    in_burst = false;
                }
                continue;
            };
            let (header, payload_len) = match PacketHeader::decode(buff.as_slice()) {
                Ok((header, payload)) => (header, payload.len()),
                Err(e) => {
                    log::warn!("Sim tx chain {}: {}", self.channel, e);
                    continue;
                }
            };
            // Samples are not played anywhere; hand the frame back now
            buff.release();
            if header.pkt_type != PacketType::Data {
                log::warn!(
                    "Sim tx chain {}: unexpected {:?} packet",
                    self.channel,
                    header.pkt_type
                );
                continue;
            }
            last_packet = Instant::now();

            if let Some(expected) = expected_seq
                && expected != header.seq
            {
                let code = if in_burst {
                    AsyncEventCode::SeqErrorInBurst
                } else {
                    AsyncEventCode::SeqError
                };
                self.raise(code, self.clock.now_ticks(), [0; 4]);
            }
            expected_seq = Some(header.seq.wrapping_add(1));

            if header.sob {
                dropping = false;
            }
            if dropping {
                if header.eob {
                    dropping = false;
                }
                continue;
            }

            if header.has_time {
                if header.timestamp < self.clock.now_ticks() {
                    log::debug!(
                        "Sim tx chain {}: packet for tick {} is late",
                        self.channel,
                        header.timestamp
                    );
                    self.raise(AsyncEventCode::TimeError, header.timestamp, [0; 4]);
                    in_burst = false;
                    dropping = !header.eob;
                    continue;
                }
                self.wait_for(header.timestamp);
            }

            if payload_len % bps != 0 {
                self.raise(AsyncEventCode::UnderflowInPacket, self.clock.now_ticks(), [0; 4]);
            }
            if header.eob {
                self.raise(AsyncEventCode::BurstAck, self.clock.now_ticks(), [0; 4]);
            }
            in_burst = !header.eob;
        }

        log::info!("Sim tx chain {} stopped", self.channel);
    }

    /// Sleep until the clock reaches `tick`, waking for shutdown
    fn wait_for(&self, tick: u64) {
        loop {
            let left = self.clock.until(tick);
            if left.is_zero() || self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(left.min(POLL));
        }
    }

    fn raise(&self, code: AsyncEventCode, tick: u64, user_payload: [u32; 4]) {
        log::trace!("Sim tx chain {} raises {:?}", self.channel, code);
        let Some(mut buff) = self.link.get_send_buffer(POLL) else {
            log::warn!("Sim tx chain {}: no frame for {:?}, dropped", self.channel, code);
            return;
        };
        let event = EventPayload {
            channel: self.channel as u32,
            code,
            user_payload,
        };
        match wire::encode_event(&event, Some(tick), buff.as_mut_slice()) {
            Ok(len) => buff.commit(len),
            Err(e) => log::error!("Sim tx chain {}: {}", self.channel, e),
        }
    }
}
