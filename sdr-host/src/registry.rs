//! Device registry
//!
//! Device families register a discovery function and a construction
//! function. [`DeviceRegistry::find`] fans discovery out over every matching
//! family; [`DeviceRegistry::make`] resolves one address and hands back a
//! shared session, reusing it while anyone still holds it.
//!
//! The registry is an explicit context object. Create one per process (or per
//! test) and register the families it should know about.

use crate::config::{ConfigOverlay, NoOverlay};
use crate::core::device::Device;
use crate::core::types::{DeviceAddr, DeviceFilter};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;

/// Discovery function: addresses of devices matching a hint
pub type FindFn = Arc<dyn Fn(&DeviceAddr) -> Result<Vec<DeviceAddr>> + Send + Sync>;

/// Construction function: a session for one resolved address
pub type MakeFn = Arc<dyn Fn(&DeviceAddr) -> Result<Arc<dyn Device>> + Send + Sync>;

/// Keys that do not identify a device
const HASH_DENYLIST: [&str; 4] = ["claimed", "skip_dram", "skip_ddc", "skip_duc"];

/// Identity hash of a device address.
///
/// Uses the `resource` key alone when present, otherwise every pair except
/// the denylisted ones. Key order never matters.
pub fn device_addr_hash(addr: &DeviceAddr) -> u64 {
    let mut hasher = DefaultHasher::new();
    match addr.get("resource") {
        Some(resource) => ("resource", resource).hash(&mut hasher),
        None => {
            // DeviceAddr iterates in key order
            for (key, value) in addr.iter() {
                if !HASH_DENYLIST.contains(&key) {
                    (key, value).hash(&mut hasher);
                }
            }
        }
    }
    hasher.finish()
}

struct Entry {
    find: FindFn,
    make: MakeFn,
    filter: DeviceFilter,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    cache: HashMap<u64, Weak<dyn Device>>,
}

/// Registry of device families and live sessions
pub struct DeviceRegistry {
    inner: Mutex<Inner>,
    overlay: Box<dyn ConfigOverlay>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Empty registry without persisted defaults
    pub fn new() -> Self {
        Self::with_overlay(Box::new(NoOverlay))
    }

    /// Empty registry applying `overlay` before every construction
    pub fn with_overlay(overlay: Box<dyn ConfigOverlay>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            overlay,
        }
    }

    /// Register a device family. Registrations are never deduplicated.
    pub fn register_device(&self, find: FindFn, make: MakeFn, filter: DeviceFilter) {
        let mut inner = self.inner.lock();
        inner.entries.push(Entry { find, make, filter });
        log::debug!(
            "Registered {:?} device family ({} total)",
            filter,
            inner.entries.len()
        );
    }

    /// Number of registered families
    pub fn num_registered(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Discover devices matching `hint`.
    ///
    /// Every matching family runs on its own thread. A family that fails or
    /// panics is logged and skipped. Results keep family registration order
    /// with duplicates (by [`device_addr_hash`]) removed.
    pub fn find(&self, hint: &DeviceAddr, filter: DeviceFilter) -> Vec<DeviceAddr> {
        let found: Vec<DeviceAddr> = self
            .discover(hint, filter)
            .into_iter()
            .map(|(addr, _)| addr)
            .collect();
        log::debug!("Found {} device(s) for {}", found.len(), hint);
        found
    }

    /// Make (or reuse) a session for the `which`th device matching `hint`.
    ///
    /// The chosen address is completed with hint keys it lacks. While a
    /// session for the same identity is alive it is returned as is; otherwise
    /// the overlay fills in defaults and the family constructs a new one.
    pub fn make(
        &self,
        hint: &DeviceAddr,
        filter: DeviceFilter,
        which: usize,
    ) -> Result<Arc<dyn Device>> {
        let candidates = self.discover(hint, filter);
        if candidates.is_empty() {
            return Err(Error::NotFound(hint.to_pp_string()));
        }
        let (mut addr, make) =
            candidates
                .into_iter()
                .nth(which)
                .ok_or_else(|| Error::IndexOutOfRange {
                    index: which,
                    hint: hint.to_pp_string(),
                })?;

        let hash = device_addr_hash(&addr);
        addr.merge_missing(hint);

        let mut inner = self.inner.lock();
        if let Some(device) = inner.cache.get(&hash).and_then(Weak::upgrade) {
            log::debug!("Reusing live session for {}", addr);
            return Ok(device);
        }

        let addr = self.overlay.apply(&addr);
        log::info!("Making device:\n{}", addr.to_pp_string());
        let device = (*make)(&addr)?;

        inner.cache.retain(|_, weak| weak.strong_count() > 0);
        inner.cache.insert(hash, Arc::downgrade(&device));
        Ok(device)
    }

    /// Run every matching family's discovery on its own scoped thread
    fn discover(&self, hint: &DeviceAddr, filter: DeviceFilter) -> Vec<(DeviceAddr, MakeFn)> {
        let families: Vec<(FindFn, MakeFn)> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|e| filter.matches(e.filter))
                .map(|e| (Arc::clone(&e.find), Arc::clone(&e.make)))
                .collect()
        };

        let results: Vec<Vec<DeviceAddr>> = thread::scope(|scope| {
            let tasks: Vec<_> = families
                .iter()
                .map(|(find, _)| {
                    scope.spawn(move || panic::catch_unwind(AssertUnwindSafe(|| (**find)(hint))))
                })
                .collect();
            tasks
                .into_iter()
                .enumerate()
                .map(|(i, task)| match task.join() {
                    Ok(Ok(Ok(addrs))) => addrs,
                    Ok(Ok(Err(e))) => {
                        log::error!("Device discovery {} failed: {}", i, e);
                        Vec::new()
                    }
                    Ok(Err(_)) | Err(_) => {
                        log::error!("Device discovery {}: {}", i, Error::ThreadPanic);
                        Vec::new()
                    }
                })
                .collect()
        });

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for ((_, make), addrs) in families.iter().zip(results) {
            for addr in addrs {
                if seen.insert(device_addr_hash(&addr)) {
                    out.push((addr, Arc::clone(make)));
                }
            }
        }
        out
    }

    /// Live sessions currently cached
    pub fn num_live_sessions(&self) -> usize {
        self.inner
            .lock()
            .cache
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}
