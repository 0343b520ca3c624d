//! Core value types shared by the registry, devices and streamers.
//!
//! - [`DeviceAddr`]: key/value device address (`type=sim,serial=sim0`)
//! - [`DeviceFilter`]: device family selector used at registration and lookup
//! - [`TimeSpec`]: device time as whole + fractional seconds

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Device address: an unordered mapping of string keys to string values.
///
/// Parsed from and printed as comma separated `key=value` pairs. A token
/// without `=` is stored as a key with an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceAddr {
    pairs: BTreeMap<String, String>,
}

impl DeviceAddr {
    /// Create an empty address
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an address string such as `type=sim,serial=sim0`
    pub fn parse(args: &str) -> Self {
        let mut addr = Self::new();
        for token in args.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.split_once('=') {
                Some((key, value)) => addr.set(key.trim(), value.trim()),
                None => addr.set(token, ""),
            }
        }
        addr
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    /// Look up a value, falling back to `default`
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse a value into `T`; `Ok(None)` when the key is absent
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                Error::InvalidArgument(format!("cannot parse value {:?} for key {}", raw, key))
            }),
        }
    }

    /// Set (create or replace) a value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.insert(key.into(), value.into());
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.pairs.remove(key)
    }

    /// Check whether a key is present
    pub fn has_key(&self, key: &str) -> bool {
        self.pairs.contains_key(key)
    }

    /// Keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.keys().map(String::as_str)
    }

    /// Key/value pairs in sorted key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when the address has no pairs
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Copy every pair of `other` whose key is absent here.
    ///
    /// Existing values are never overridden.
    pub fn merge_missing(&mut self, other: &DeviceAddr) {
        for (key, value) in other.iter() {
            if !self.has_key(key) {
                self.set(key, value);
            }
        }
    }

    /// Multi-line representation used in error messages
    pub fn to_pp_string(&self) -> String {
        if self.is_empty() {
            return "Empty Device Address".to_string();
        }
        let mut out = String::from("Device Address:\n");
        for (key, value) in self.iter() {
            out.push_str(&format!("    {}: {}\n", key, value));
        }
        out
    }
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if value.is_empty() {
                write!(f, "{}", key)?;
            } else {
                write!(f, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

impl FromStr for DeviceAddr {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for DeviceAddr {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeviceAddr {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut addr = Self::new();
        for (k, v) in iter {
            addr.set(k, v);
        }
        addr
    }
}

/// Device family selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceFilter {
    /// Match every registered family (lookups only)
    #[default]
    Any,
    /// Radio devices
    Usrp,
    /// Clock distribution devices
    Clock,
}

impl DeviceFilter {
    /// Whether a registration made with `entry` is selected by this filter
    pub fn matches(self, entry: DeviceFilter) -> bool {
        self == DeviceFilter::Any || self == entry
    }
}

/// Device time: whole seconds plus a fractional part in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct TimeSpec {
    full_secs: i64,
    frac_secs: f64,
}

impl TimeSpec {
    /// Create from real seconds
    pub fn new(secs: f64) -> Self {
        Self::from_parts(0, secs)
    }

    /// Create from whole and fractional parts, normalizing the fraction
    pub fn from_parts(full_secs: i64, frac_secs: f64) -> Self {
        let carry = frac_secs.floor();
        Self {
            full_secs: full_secs + carry as i64,
            frac_secs: frac_secs - carry,
        }
    }

    /// Create from a tick count at `tick_rate` ticks per second
    pub fn from_ticks(ticks: i64, tick_rate: f64) -> Self {
        let full = (ticks as f64 / tick_rate).floor() as i64;
        let rem = ticks as f64 - full as f64 * tick_rate;
        Self::from_parts(full, rem / tick_rate)
    }

    /// Convert to ticks at `tick_rate`, rounding to the nearest tick
    pub fn to_ticks(&self, tick_rate: f64) -> i64 {
        (self.full_secs as f64 * tick_rate).round() as i64 + (self.frac_secs * tick_rate).round() as i64
    }

    /// Whole seconds
    pub fn full_secs(&self) -> i64 {
        self.full_secs
    }

    /// Fractional seconds in `[0, 1)`
    pub fn frac_secs(&self) -> f64 {
        self.frac_secs
    }

    /// Time as real seconds (loses precision for large values)
    pub fn real_secs(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }
}

impl Add for TimeSpec {
    type Output = TimeSpec;

    fn add(self, rhs: TimeSpec) -> TimeSpec {
        TimeSpec::from_parts(self.full_secs + rhs.full_secs, self.frac_secs + rhs.frac_secs)
    }
}

impl Sub for TimeSpec {
    type Output = TimeSpec;

    fn sub(self, rhs: TimeSpec) -> TimeSpec {
        TimeSpec::from_parts(self.full_secs - rhs.full_secs, self.frac_secs - rhs.frac_secs)
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.real_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr = DeviceAddr::parse("serial=sim0, type=sim ,claimed");
        assert_eq!(addr.get("type"), Some("sim"));
        assert_eq!(addr.get("serial"), Some("sim0"));
        assert_eq!(addr.get("claimed"), Some(""));
        assert_eq!(addr.to_string(), "claimed,serial=sim0,type=sim");
        assert_eq!(DeviceAddr::parse(&addr.to_string()), addr);
    }

    #[test]
    fn test_merge_missing_keeps_existing() {
        let mut addr = DeviceAddr::parse("type=sim,serial=sim0");
        addr.merge_missing(&DeviceAddr::parse("serial=other,spp=100"));
        assert_eq!(addr.get("serial"), Some("sim0"));
        assert_eq!(addr.get("spp"), Some("100"));
    }

    #[test]
    fn test_get_parsed() {
        let addr = DeviceAddr::parse("spp=128,rate=bad");
        assert_eq!(addr.get_parsed::<usize>("spp").unwrap(), Some(128));
        assert_eq!(addr.get_parsed::<usize>("missing").unwrap(), None);
        assert!(matches!(
            addr.get_parsed::<f64>("rate"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_pp_string() {
        assert_eq!(DeviceAddr::new().to_pp_string(), "Empty Device Address");
        let pp = DeviceAddr::parse("type=sim").to_pp_string();
        assert!(pp.contains("    type: sim"));
    }

    #[test]
    fn test_filter_matching() {
        assert!(DeviceFilter::Any.matches(DeviceFilter::Clock));
        assert!(DeviceFilter::Usrp.matches(DeviceFilter::Usrp));
        assert!(!DeviceFilter::Usrp.matches(DeviceFilter::Clock));
    }

    #[test]
    fn test_time_spec_ticks() {
        let t = TimeSpec::from_ticks(2_500_000, 1e6);
        assert_eq!(t.full_secs(), 2);
        assert!((t.frac_secs() - 0.5).abs() < 1e-12);
        assert_eq!(t.to_ticks(1e6), 2_500_000);

        let sum = TimeSpec::new(1.75) + TimeSpec::new(0.5);
        assert_eq!(sum.full_secs(), 2);
        assert!((sum.frac_secs() - 0.25).abs() < 1e-12);
    }
}
