//! Per-service geographic blacklist.
//!
//! When a live query to a service reports that it has no coverage at the
//! user's position, the 1°×1° cell is remembered so the service is not
//! offered there again. Each service keeps a bounded number of cells; the
//! oldest entry by timestamp is replaced when the list is full.

use std::collections::HashMap;

use serde::Serialize;

use crate::catalog::ServiceId;
use crate::error::{AtlasError, Result};
use crate::geo::GridCell;

/// Default cells remembered per service.
pub const DEFAULT_ENTRIES_PER_SERVICE: usize = 8;

/// Reason recorded when the caller gives none.
pub const DEFAULT_REASON: &str = "No coverage";

/// Longest stored reason, in bytes.
pub const MAX_REASON_LEN: usize = 63;

/// One blacklisted cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlacklistEntry {
    pub cell: GridCell,
    pub reason: String,
    /// Seconds since the epoch when the entry was last set.
    pub timestamp: u64,
    #[serde(skip)]
    seq: u64,
}

/// Blacklist summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlacklistStats {
    pub services_with_blacklists: usize,
    pub total_regions: usize,
    pub max_regions_per_service: usize,
}

/// Blacklisted cells per service.
#[derive(Debug, Clone)]
pub struct GeoBlacklist {
    capacity: usize,
    entries: HashMap<ServiceId, Vec<BlacklistEntry>>,
    next_seq: u64,
}

impl Default for GeoBlacklist {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRIES_PER_SERVICE)
    }
}

fn truncate_reason(reason: Option<&str>) -> String {
    let reason = reason.filter(|r| !r.is_empty()).unwrap_or(DEFAULT_REASON);
    if reason.len() <= MAX_REASON_LEN {
        return reason.to_string();
    }
    let mut end = MAX_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

impl GeoBlacklist {
    /// Create a blacklist keeping up to `capacity` cells per service.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blacklist the cell containing a coordinate.
    ///
    /// Re-adding a known cell refreshes its reason and timestamp. When the
    /// service's list is full the entry set longest ago is replaced.
    ///
    /// # Arguments
    ///
    /// * `service` - Service that reported no coverage
    /// * `lat`, `lon` - Position of the failed query
    /// * `reason` - Free text, defaults to [`DEFAULT_REASON`]
    /// * `now_seconds` - Current time
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidCoordinates`] for coordinates outside the
    /// WGS84 range.
    pub fn add(
        &mut self,
        service: ServiceId,
        lat: f64,
        lon: f64,
        reason: Option<&str>,
        now_seconds: u64,
    ) -> Result<GridCell> {
        let cell = GridCell::containing(lat, lon)?;
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = BlacklistEntry {
            cell,
            reason: truncate_reason(reason),
            timestamp: now_seconds,
            seq,
        };

        let list = self.entries.entry(service).or_default();
        if let Some(existing) = list.iter_mut().find(|e| e.cell == cell) {
            *existing = entry;
        } else if list.len() < self.capacity {
            list.push(entry);
        } else if let Some(oldest) = list.iter_mut().min_by_key(|e| (e.timestamp, e.seq)) {
            tracing::debug!(
                service = service.0,
                evicted_lat = oldest.cell.lat,
                evicted_lon = oldest.cell.lon,
                "blacklist full, replacing oldest cell"
            );
            *oldest = entry;
        }

        Ok(cell)
    }

    /// Whether the cell containing the coordinate is blacklisted.
    ///
    /// Invalid coordinates are never blacklisted.
    pub fn is_blacklisted(&self, service: ServiceId, lat: f64, lon: f64) -> bool {
        let Ok(cell) = GridCell::containing(lat, lon) else {
            return false;
        };
        self.entries
            .get(&service)
            .is_some_and(|list| list.iter().any(|e| e.cell == cell))
    }

    /// Remove the cell containing a coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::NotFound`] if the cell is not blacklisted.
    pub fn remove(&mut self, service: ServiceId, lat: f64, lon: f64) -> Result<()> {
        let cell = GridCell::containing(lat, lon)?;
        let not_found = || {
            AtlasError::NotFound(format!(
                "blacklist cell {}/{} for service {service}",
                cell.lat, cell.lon
            ))
        };

        let list = self.entries.get_mut(&service).ok_or_else(not_found)?;
        let pos = list
            .iter()
            .position(|e| e.cell == cell)
            .ok_or_else(not_found)?;
        list.remove(pos);
        if list.is_empty() {
            self.entries.remove(&service);
        }
        Ok(())
    }

    /// Forget every cell of one service.
    pub fn clear_service(&mut self, service: ServiceId) {
        self.entries.remove(&service);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries of one service, oldest first.
    pub fn entries(&self, service: ServiceId) -> Vec<&BlacklistEntry> {
        let mut list: Vec<_> = self
            .entries
            .get(&service)
            .map(|l| l.iter().collect())
            .unwrap_or_default();
        list.sort_by_key(|e| (e.timestamp, e.seq));
        list
    }

    pub fn stats(&self) -> BlacklistStats {
        BlacklistStats {
            services_with_blacklists: self.entries.len(),
            total_regions: self.entries.values().map(Vec::len).sum(),
            max_regions_per_service: self.entries.values().map(Vec::len).max().unwrap_or(0),
        }
    }
}
