//! Sample conversion between host memory and the wire
//!
//! Host samples are `Complex<f32>` (full scale ±1.0) or `Complex<i16>`.
//! Wire samples are interleaved I/Q integers, big-endian.

use crate::error::{Error, Result};
use num_complex::Complex;
use std::fmt;
use std::str::FromStr;

/// Over-the-wire sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OtwFormat {
    /// 16-bit I and Q
    #[default]
    Sc16,
    /// 8-bit I and Q
    Sc8,
}

impl OtwFormat {
    /// Bytes per complex sample on the wire
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Sc16 => 4,
            Self::Sc8 => 2,
        }
    }
}

impl FromStr for OtwFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sc16" => Ok(Self::Sc16),
            "sc8" => Ok(Self::Sc8),
            other => Err(Error::InvalidArgument(format!(
                "unsupported wire format {:?} (expected sc16 or sc8)",
                other
            ))),
        }
    }
}

impl fmt::Display for OtwFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sc16 => f.write_str("sc16"),
            Self::Sc8 => f.write_str("sc8"),
        }
    }
}

/// A host-memory sample type
pub trait HostSample: Copy + Default + Send + 'static {
    /// Build from 16-bit I/Q
    fn from_sc16(i: i16, q: i16) -> Self;

    /// Reduce to 16-bit I/Q
    fn to_sc16(self) -> (i16, i16);
}

const SC16_SCALE: f32 = 32767.0;

impl HostSample for Complex<f32> {
    #[inline]
    fn from_sc16(i: i16, q: i16) -> Self {
        Complex::new(i as f32 / SC16_SCALE, q as f32 / SC16_SCALE)
    }

    #[inline]
    fn to_sc16(self) -> (i16, i16) {
        let scale = |v: f32| (v.clamp(-1.0, 1.0) * SC16_SCALE).round() as i16;
        (scale(self.re), scale(self.im))
    }
}

impl HostSample for Complex<i16> {
    #[inline]
    fn from_sc16(i: i16, q: i16) -> Self {
        Complex::new(i, q)
    }

    #[inline]
    fn to_sc16(self) -> (i16, i16) {
        (self.re, self.im)
    }
}

/// Convert wire bytes into host samples; returns the number of samples written
pub fn unpack<S: HostSample>(otw: OtwFormat, bytes: &[u8], out: &mut [S]) -> usize {
    let count = out.len().min(bytes.len() / otw.bytes_per_sample());
    match otw {
        OtwFormat::Sc16 => {
            for (dst, src) in out[..count].iter_mut().zip(bytes.chunks_exact(4)) {
                let i = i16::from_be_bytes([src[0], src[1]]);
                let q = i16::from_be_bytes([src[2], src[3]]);
                *dst = S::from_sc16(i, q);
            }
        }
        OtwFormat::Sc8 => {
            for (dst, src) in out[..count].iter_mut().zip(bytes.chunks_exact(2)) {
                let i = (src[0] as i8 as i16) << 8;
                let q = (src[1] as i8 as i16) << 8;
                *dst = S::from_sc16(i, q);
            }
        }
    }
    count
}

/// Convert host samples into wire bytes; returns the number of bytes written
pub fn pack<S: HostSample>(otw: OtwFormat, samples: &[S], out: &mut [u8]) -> usize {
    let bps = otw.bytes_per_sample();
    let count = samples.len().min(out.len() / bps);
    match otw {
        OtwFormat::Sc16 => {
            for (src, dst) in samples[..count].iter().zip(out.chunks_exact_mut(4)) {
                let (i, q) = src.to_sc16();
                dst[..2].copy_from_slice(&i.to_be_bytes());
                dst[2..].copy_from_slice(&q.to_be_bytes());
            }
        }
        OtwFormat::Sc8 => {
            for (src, dst) in samples[..count].iter().zip(out.chunks_exact_mut(2)) {
                let (i, q) = src.to_sc16();
                dst[0] = (i >> 8) as i8 as u8;
                dst[1] = (q >> 8) as i8 as u8;
            }
        }
    }
    count * bps
}
