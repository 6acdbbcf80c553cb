//! Precise coverage verification.
//!
//! Tiles are coarse: a level-0 tile spans 90° of latitude, so a service
//! covering Massachusetts shows up as a candidate anywhere in the northern
//! Americas. This module checks candidates against their real bounding box
//! and computes the distances used for ranking.

use serde::Serialize;

use crate::catalog::{Catalog, ServiceId, ServiceRecord};
use crate::error::Result;
use crate::geo::validate_coordinates;
use crate::index::SpatialIndex;

/// Distance metrics of one service relative to a query point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coverage {
    pub service: ServiceId,
    /// The query point lies inside the service's bounding box.
    pub contains: bool,
    /// Distance to the bounding box center in kilometres.
    pub center_km: f64,
    /// Distance to the nearest box edge, zero when contained.
    pub edge_km: f64,
}

impl Coverage {
    /// Measure one service against a coordinate.
    pub fn measure(service: &ServiceRecord, lat: f64, lon: f64) -> Self {
        Self {
            service: service.id,
            contains: service.coverage.contains(lat, lon),
            center_km: service.coverage.center_distance_km(lat, lon),
            edge_km: service.coverage.edge_distance_km(lat, lon),
        }
    }
}

/// Counts from one spatial-then-geographic search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Level the spatial index answered from.
    pub level: u8,
    /// Services returned by the spatial index.
    pub spatial_candidates: usize,
    /// Candidates whose bounding box contains the point.
    pub verified: usize,
}

impl SearchStats {
    /// Fraction of spatial candidates rejected by verification.
    pub fn false_positive_rate(&self) -> f64 {
        if self.spatial_candidates == 0 {
            0.0
        } else {
            (self.spatial_candidates - self.verified) as f64 / self.spatial_candidates as f64
        }
    }
}

/// Catalog-wide coverage summary for a point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageStats {
    pub total_services: usize,
    pub services_with_coverage: usize,
    /// Smallest center distance over all services.
    pub nearest_km: f64,
    /// Largest center distance over all services.
    pub farthest_km: f64,
}

impl CoverageStats {
    pub fn coverage_percent(&self) -> f64 {
        if self.total_services == 0 {
            0.0
        } else {
            self.services_with_coverage as f64 * 100.0 / self.total_services as f64
        }
    }
}

/// Verifies index candidates against the catalog.
///
/// # Example
///
/// ```ignore
/// let verifier = Verifier::new(&catalog, &index);
/// for hit in verifier.verified(-33.87, 151.21)? {
///     println!("{} at {:.0} km", catalog.service(hit.service)?.name, hit.center_km);
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Verifier<'a> {
    catalog: &'a Catalog,
    index: &'a SpatialIndex,
}

impl<'a> Verifier<'a> {
    pub fn new(catalog: &'a Catalog, index: &'a SpatialIndex) -> Self {
        Self { catalog, index }
    }

    fn measured(&self, lat: f64, lon: f64) -> Result<impl Iterator<Item = Coverage> + 'a> {
        let (_, candidates) = self.index.candidates(lat, lon)?;
        let catalog = self.catalog;
        Ok(candidates
            .iter()
            .filter_map(move |id| catalog.get(*id))
            .map(move |s| Coverage::measure(s, lat, lon)))
    }

    /// Candidates whose bounding box contains the point, in index order.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidCoordinates`](crate::AtlasError) for
    /// coordinates outside the WGS84 range.
    pub fn verified(&self, lat: f64, lon: f64) -> Result<Vec<Coverage>> {
        Ok(self.measured(lat, lon)?.filter(|c| c.contains).collect())
    }

    /// Candidates within `max_km` of their coverage edge.
    ///
    /// Contained services have an edge distance of zero and are always kept.
    pub fn nearby(&self, lat: f64, lon: f64, max_km: f64) -> Result<Vec<Coverage>> {
        Ok(self
            .measured(lat, lon)?
            .filter(|c| c.contains || c.edge_km <= max_km)
            .collect())
    }

    /// Spatial versus verified counts for a point.
    pub fn search_stats(&self, lat: f64, lon: f64) -> Result<SearchStats> {
        let (level, candidates) = self.index.candidates(lat, lon)?;
        Ok(SearchStats {
            level,
            spatial_candidates: candidates.len(),
            verified: self.verified(lat, lon)?.len(),
        })
    }
}

/// All catalog services covering the point or within `max_km` of their
/// edge, sorted by center distance.
///
/// This bypasses the spatial index and is meant for diagnostics and small
/// catalogs.
pub fn services_near(catalog: &Catalog, lat: f64, lon: f64, max_km: f64) -> Result<Vec<Coverage>> {
    validate_coordinates(lat, lon)?;
    let mut hits: Vec<_> = catalog
        .services()
        .iter()
        .map(|s| Coverage::measure(s, lat, lon))
        .filter(|c| c.contains || c.edge_km <= max_km)
        .collect();
    hits.sort_by(|a, b| a.center_km.total_cmp(&b.center_km));
    Ok(hits)
}

/// Coverage summary of the whole catalog for a point.
pub fn coverage_stats(catalog: &Catalog, lat: f64, lon: f64) -> Result<CoverageStats> {
    validate_coordinates(lat, lon)?;
    let mut stats = CoverageStats {
        total_services: catalog.len(),
        nearest_km: f64::INFINITY,
        ..Default::default()
    };

    for service in catalog.services() {
        let c = Coverage::measure(service, lat, lon);
        if c.contains {
            stats.services_with_coverage += 1;
        }
        stats.nearest_km = stats.nearest_km.min(c.center_km);
        stats.farthest_km = stats.farthest_km.max(c.center_km);
    }

    if catalog.is_empty() {
        stats.nearest_km = 0.0;
    }
    Ok(stats)
}
