//! Mountpoints discovered from provider sourcetables.
//!
//! The engine does not fetch sourcetables itself. Callers stream a
//! provider's table, parse its `STR` lines, and hand the resulting
//! [`Mountpoint`]s to the engine per service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{AuthMethod, ServiceId};
use crate::error::{AtlasError, Result};
use crate::geo::{haversine_km, validate_coordinates};

/// Default mountpoints kept per service.
pub const DEFAULT_MOUNTPOINTS_PER_SERVICE: usize = 32;

/// One data stream of a caster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mountpoint {
    pub name: String,
    #[serde(default)]
    pub identifier: String,
    pub lat: f64,
    pub lon: f64,
    /// Stream format, e.g. `RTCM 3.2`.
    #[serde(default)]
    pub format: String,
    /// Message list, e.g. `1004(1),1005(10)`.
    #[serde(default)]
    pub format_details: String,
    /// Constellations, e.g. `GPS+GLO+GAL`.
    #[serde(default)]
    pub nav_system: String,
    /// Bits per second, zero when unknown.
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub nmea_required: bool,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default)]
    pub fee_required: bool,
}

impl Mountpoint {
    /// A free, unauthenticated stream with unknown bitrate.
    pub fn new(name: &str, lat: f64, lon: f64, format: &str) -> Self {
        Self {
            name: name.to_string(),
            identifier: String::new(),
            lat,
            lon,
            format: format.to_string(),
            format_details: String::new(),
            nav_system: String::new(),
            bitrate: 0,
            nmea_required: false,
            auth: AuthMethod::None,
            fee_required: false,
        }
    }

    pub fn distance_km(&self, lat: f64, lon: f64) -> f64 {
        haversine_km(lat, lon, self.lat, self.lon)
    }

    /// Whether the format or its details mention `wanted`, ignoring case.
    pub fn offers_format(&self, wanted: &str) -> bool {
        let wanted = wanted.to_ascii_lowercase();
        self.format.to_ascii_lowercase().contains(&wanted)
            || self.format_details.to_ascii_lowercase().contains(&wanted)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AtlasError::InvalidParameter("mountpoint without a name".into()));
        }
        validate_coordinates(self.lat, self.lon)
    }
}

/// Mountpoints per service, each list bounded.
#[derive(Debug, Clone)]
pub struct MountpointTable {
    capacity: usize,
    by_service: HashMap<ServiceId, Vec<Mountpoint>>,
}

impl Default for MountpointTable {
    fn default() -> Self {
        Self::new(DEFAULT_MOUNTPOINTS_PER_SERVICE)
    }
}

impl MountpointTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            by_service: HashMap::new(),
        }
    }

    /// Replace the mountpoints of a service.
    ///
    /// The table is left untouched if any mountpoint is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidParameter`] or
    /// [`AtlasError::InvalidCoordinates`] for a malformed mountpoint and
    /// [`AtlasError::MountpointsFull`] if the list exceeds the capacity.
    pub fn replace(&mut self, service: ServiceId, mountpoints: Vec<Mountpoint>) -> Result<()> {
        if mountpoints.len() > self.capacity {
            return Err(AtlasError::MountpointsFull {
                service,
                capacity: self.capacity,
            });
        }
        for mp in &mountpoints {
            mp.validate()?;
        }
        if mountpoints.is_empty() {
            self.by_service.remove(&service);
        } else {
            self.by_service.insert(service, mountpoints);
        }
        Ok(())
    }

    /// Append one mountpoint to a service.
    pub fn push(&mut self, service: ServiceId, mountpoint: Mountpoint) -> Result<()> {
        mountpoint.validate()?;
        let list = self.by_service.entry(service).or_default();
        if list.len() >= self.capacity {
            return Err(AtlasError::MountpointsFull {
                service,
                capacity: self.capacity,
            });
        }
        list.push(mountpoint);
        Ok(())
    }

    /// Mountpoints of a service, empty if none were ingested.
    pub fn get(&self, service: ServiceId) -> &[Mountpoint] {
        self.by_service
            .get(&service)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn clear_service(&mut self, service: ServiceId) {
        self.by_service.remove(&service);
    }

    pub fn clear(&mut self) {
        self.by_service.clear();
    }

    /// Total mountpoints over all services.
    pub fn len(&self) -> usize {
        self.by_service.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_service.is_empty()
    }
}
