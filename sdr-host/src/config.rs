//! Persisted device defaults
//!
//! Loads per-device default arguments from a TOML file and overlays them on
//! device addresses before a device is constructed. Keys already present in
//! an address are never overridden.
//!
//! ```toml
//! [defaults]
//! spp = 100
//!
//! ["type=sim"]
//! tick_rate = 2e6
//!
//! ["serial=sim1"]
//! num_channels = 1
//! ```
//!
//! Precedence: address keys, then sections whose `key=value` pair the address
//! carries, then `[defaults]`.

use crate::core::types::DeviceAddr;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Environment variable naming the defaults file
pub const CONFIG_ENV_VAR: &str = "SDR_HOST_CONFIG";

/// Supplies default arguments for a device address before construction
pub trait ConfigOverlay: Send + Sync {
    /// Return `addr` with defaults filled in for keys it lacks
    fn apply(&self, addr: &DeviceAddr) -> DeviceAddr;
}

/// Overlay that adds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverlay;

impl ConfigOverlay for NoOverlay {
    fn apply(&self, addr: &DeviceAddr) -> DeviceAddr {
        addr.clone()
    }
}

/// File layout: `[defaults]` plus any number of `"key=value"` tables
#[derive(Debug, Deserialize)]
struct DefaultsFile {
    #[serde(default)]
    defaults: toml::Table,
    #[serde(flatten)]
    sections: BTreeMap<String, toml::Table>,
}

/// Defaults scoped to addresses carrying one key/value pair
#[derive(Debug, Clone, PartialEq)]
struct Section {
    key: String,
    value: String,
    args: DeviceAddr,
}

/// Device defaults loaded from TOML
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceDefaults {
    defaults: DeviceAddr,
    sections: Vec<Section>,
}

impl DeviceDefaults {
    /// Load defaults from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// Load the file named by `SDR_HOST_CONFIG`; `Ok(None)` when unset
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => {
                log::info!("Loading device defaults from {:?}", path);
                Self::from_file(path).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Defaults applied to every device
    pub fn global(&self) -> &DeviceAddr {
        &self.defaults
    }

    /// Number of `key=value` sections
    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }
}

impl FromStr for DeviceDefaults {
    type Err = Error;

    fn from_str(contents: &str) -> Result<Self> {
        let file: DefaultsFile = toml::from_str(contents)?;

        let defaults = table_to_addr("defaults", &file.defaults)?;
        let mut sections = Vec::with_capacity(file.sections.len());
        for (name, table) in &file.sections {
            let (key, value) = name.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "section [{}] must be named key=value (e.g. [\"type=sim\"])",
                    name
                ))
            })?;
            sections.push(Section {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
                args: table_to_addr(name, table)?,
            });
        }
        Ok(Self { defaults, sections })
    }
}

impl ConfigOverlay for DeviceDefaults {
    fn apply(&self, addr: &DeviceAddr) -> DeviceAddr {
        let mut out = addr.clone();
        for section in &self.sections {
            if addr.get(&section.key) == Some(section.value.as_str()) {
                out.merge_missing(&section.args);
            }
        }
        out.merge_missing(&self.defaults);
        out
    }
}

/// Flatten a table of scalars into address pairs
fn table_to_addr(section: &str, table: &toml::Table) -> Result<DeviceAddr> {
    let mut addr = DeviceAddr::new();
    for (key, value) in table {
        let value = match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                return Err(Error::Config(format!(
                    "[{}] {}: expected a scalar, found {}",
                    section,
                    key,
                    other.type_str()
                )));
            }
        };
        addr.set(key.as_str(), value);
    }
    Ok(addr)
}
