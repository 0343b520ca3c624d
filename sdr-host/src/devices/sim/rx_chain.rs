//! Simulated receive DSP chain
//!
//! One thread per channel. Reads stream commands from the host, produces a
//! ramp at the device tick rate and reports stream errors as status packets.
//!
//! ```text
//!           stream cmd ("now")          stream cmd (timed)
//!                  │                           │
//!                  ▼                           ▼
//!   start = next packet boundary      start = command time
//!                  │                  (past → LATE_COMMAND)
//!                  └────────────┬──────────────┘
//!                               ▼
//!        ┌──────────────── streaming ────────────────┐
//!        │ wait for spp ticks, acquire frame, send   │
//!        │ no frame → OVERFLOW (continuous resumes,  │
//!        │            fixed count halts)             │
//!        │ "more" exhausted, nothing queued          │
//!        │            → BROKEN_CHAIN                 │
//!        └───────────────────────────────────────────┘
//! ```

use super::clock::SimClock;
use crate::streaming::convert::{self, OtwFormat};
use crate::streaming::metadata::RxErrorCode;
use crate::streaming::stream_cmd::{StreamCmd, StreamMode};
use crate::streaming::wire::{self, HEADER_LEN, PacketHeader, PacketType};
use crate::transport::{LoopbackTransport, ZeroCopyTransport};
use num_complex::Complex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Longest sleep between checks for commands and shutdown
const POLL: Duration = Duration::from_millis(2);

/// A burst in progress
#[derive(Debug, Clone, Copy)]
struct Burst {
    mode: StreamMode,
    /// Samples left for the fixed-count modes
    remaining: u64,
    next_tick: u64,
    sob: bool,
}

/// Receive chain of one channel
pub(super) struct RxChain {
    pub channel: usize,
    pub link: LoopbackTransport,
    pub clock: Arc<SimClock>,
    pub shutdown: Arc<AtomicBool>,
    pub otw: OtwFormat,
    pub spp: usize,
}

impl RxChain {
    pub fn run(self) {
        log::info!("Sim rx chain {} started (spp={})", self.channel, self.spp);

        let mut state = ChainState {
            queue: VecDeque::new(),
            burst: None,
            seq: 0,
            overflow_at: None,
            scratch: Vec::with_capacity(self.spp),
        };

        while !self.shutdown.load(Ordering::Relaxed) && !self.link.is_closed() {
            let wait = if state.burst.is_some() { Duration::ZERO } else { POLL };
            if let Some(cmd) = self.next_command(wait) {
                self.handle_command(&mut state, cmd);
                continue;
            }

            if let Some(tick) = state.overflow_at {
                if self.send_status(RxErrorCode::Overflow, tick) {
                    state.overflow_at = None;
                } else if state.burst.is_none() {
                    thread::sleep(POLL);
                    continue;
                }
            }

            if state.burst.is_none() {
                match state.queue.pop_front() {
                    Some(cmd) => self.start_burst(&mut state, &cmd),
                    None => continue,
                }
            }
            self.produce(&mut state);
        }

        log::info!("Sim rx chain {} stopped", self.channel);
    }

    fn next_command(&self, wait: Duration) -> Option<StreamCmd> {
        let buff = self.link.get_recv_buffer(wait)?;
        let cmd = PacketHeader::decode(buff.as_slice()).and_then(|(header, payload)| {
            if header.pkt_type != PacketType::StreamCmd {
                return Err(crate::error::Error::InvalidPacket(format!(
                    "{:?} packet on a receive chain",
                    header.pkt_type
                )));
            }
            wire::decode_stream_cmd(&header, payload, self.clock.tick_rate())
        });
        match cmd {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                log::warn!("Sim rx chain {}: {}", self.channel, e);
                None
            }
        }
    }

    fn handle_command(&self, state: &mut ChainState, cmd: StreamCmd) {
        log::debug!(
            "Sim rx chain {} command {:?} num_samps={}",
            self.channel,
            cmd.stream_mode,
            cmd.num_samps
        );
        match cmd.stream_mode {
            StreamMode::StopContinuous => {
                state.queue.clear();
                if let Some(burst) = state.burst.take() {
                    self.send_end_of_burst(state, burst.next_tick);
                }
            }
            _ if matches!(
                state.burst,
                Some(Burst {
                    mode: StreamMode::StartContinuous,
                    ..
                })
            ) =>
            {
                log::warn!(
                    "Sim rx chain {}: already streaming continuously, {:?} ignored",
                    self.channel,
                    cmd.stream_mode
                );
            }
            _ => state.queue.push_back(cmd),
        }
    }

    fn start_burst(&self, state: &mut ChainState, cmd: &StreamCmd) {
        let now = self.clock.now_ticks();
        let spp = self.spp as u64;
        let start = if cmd.stream_now {
            now.div_ceil(spp) * spp
        } else {
            let at = cmd.time_spec.to_ticks(self.clock.tick_rate()).max(0) as u64;
            if at < now {
                log::debug!(
                    "Sim rx chain {}: command for tick {} arrived at tick {}",
                    self.channel,
                    at,
                    now
                );
                self.send_status(RxErrorCode::LateCommand, now);
                return;
            }
            at
        };

        if cmd.stream_mode.is_fixed_count() && cmd.num_samps == 0 {
            if cmd.stream_mode == StreamMode::NumSampsAndDone {
                self.send_end_of_burst(state, start);
            }
            return;
        }
        state.burst = Some(Burst {
            mode: cmd.stream_mode,
            remaining: cmd.num_samps,
            next_tick: start,
            sob: true,
        });
    }

    fn produce(&self, state: &mut ChainState) {
        let Some(mut burst) = state.burst else {
            return;
        };
        let fixed = burst.mode.is_fixed_count();
        let n = if fixed {
            burst.remaining.min(self.spp as u64)
        } else {
            self.spp as u64
        };

        let wait = self.clock.until(burst.next_tick + n);
        if !wait.is_zero() {
            thread::sleep(wait.min(POLL));
            return;
        }

        let Some(mut buff) = self.link.get_send_buffer(Duration::ZERO) else {
            burst.next_tick += n;
            state.overflow_at = Some(burst.next_tick);
            if fixed {
                log::debug!("Sim rx chain {}: overflow, halting", self.channel);
                state.burst = None;
                state.queue.clear();
            } else {
                log::trace!("Sim rx chain {}: overflow", self.channel);
                burst.sob = true;
                state.burst = Some(burst);
            }
            return;
        };

        let eob = burst.mode == StreamMode::NumSampsAndDone && burst.remaining == n;
        state.scratch.clear();
        state.scratch.extend((burst.next_tick..burst.next_tick + n).map(ramp));
        let frame = buff.as_mut_slice();
        let bytes = convert::pack(self.otw, &state.scratch, &mut frame[HEADER_LEN..]);
        let header = PacketHeader {
            pkt_type: PacketType::Data,
            has_time: true,
            sob: burst.sob,
            eob,
            eov: false,
            seq: state.seq,
            payload_len: bytes as u32,
            timestamp: burst.next_tick,
        };
        if let Err(e) = header.encode(frame) {
            log::error!("Sim rx chain {}: {}", self.channel, e);
            state.burst = None;
            return;
        }
        buff.commit(HEADER_LEN + bytes);
        buff.release();

        state.seq = state.seq.wrapping_add(1);
        burst.next_tick += n;
        burst.sob = false;
        if !fixed {
            state.burst = Some(burst);
            return;
        }

        burst.remaining -= n;
        if burst.remaining > 0 {
            state.burst = Some(burst);
            return;
        }
        state.burst = None;
        if burst.mode == StreamMode::NumSampsAndMore {
            match state.queue.pop_front() {
                Some(next) => {
                    // Continue the chain without a gap
                    state.burst = Some(Burst {
                        mode: next.stream_mode,
                        remaining: next.num_samps,
                        next_tick: burst.next_tick,
                        sob: false,
                    });
                }
                None => {
                    log::debug!("Sim rx chain {}: chain ended without a follow-up", self.channel);
                    self.send_status(RxErrorCode::BrokenChain, burst.next_tick);
                }
            }
        }
    }

    fn send_end_of_burst(&self, state: &mut ChainState, tick: u64) {
        // The host may still be draining data, so wait for it
        let mut buff = loop {
            if let Some(buff) = self.link.get_send_buffer(POLL) {
                break buff;
            }
            if self.shutdown.load(Ordering::Relaxed) || self.link.is_closed() {
                log::warn!("Sim rx chain {}: no frame for end of burst", self.channel);
                return;
            }
        };
        let header = PacketHeader {
            eob: true,
            seq: state.seq,
            ..PacketHeader::new(PacketType::Data).with_time(tick)
        };
        match wire::encode_packet(&header, &[], buff.as_mut_slice()) {
            Ok(len) => {
                buff.commit(len);
                state.seq = state.seq.wrapping_add(1);
            }
            Err(e) => log::error!("Sim rx chain {}: {}", self.channel, e),
        }
    }

    /// Send a status packet; false when no frame is free
    fn send_status(&self, code: RxErrorCode, tick: u64) -> bool {
        let Some(mut buff) = self.link.get_send_buffer(Duration::ZERO) else {
            return false;
        };
        match wire::encode_status(code, Some(tick), buff.as_mut_slice()) {
            Ok(len) => {
                buff.commit(len);
                true
            }
            Err(e) => {
                log::error!("Sim rx chain {}: {}", self.channel, e);
                false
            }
        }
    }
}

struct ChainState {
    /// Commands waiting for the current burst to finish
    queue: VecDeque<StreamCmd>,
    burst: Option<Burst>,
    seq: u16,
    /// Tick at which streaming resumed after an unreported overflow
    overflow_at: Option<u64>,
    scratch: Vec<Complex<i16>>,
}

/// Ramp sample for `tick`
pub(super) fn ramp(tick: u64) -> Complex<i16> {
    let v = (tick & 0x7fff) as i16;
    Complex::new(v, -v)
}
