//! Hierarchical spatial index over a catalog.
//!
//! Every service is assigned to each tile its coverage box overlaps, at every
//! level. Lookup tries the finest level first and falls back to coarser
//! levels until a tile with services is found, so sparsely covered areas
//! still resolve through a continental tile while dense areas get a short
//! candidate list.

use crate::catalog::{Catalog, ServiceId};
use crate::error::{AtlasError, Result};
use crate::geo::{to_centidegrees, validate_coordinates, CENTI};
use crate::tile::{TileKey, FINEST_LEVEL, MAX_LEVELS};

/// Capacity limits of a [`SpatialIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexConfig {
    /// Maximum number of populated tiles across all levels.
    pub max_tiles: usize,
    /// Maximum number of services assigned to one tile.
    pub max_services_per_tile: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_tiles: 4096,
            max_services_per_tile: 64,
        }
    }
}

/// Services assigned to one tile.
#[derive(Debug, Clone)]
pub struct TileEntry {
    pub key: TileKey,
    pub services: Vec<ServiceId>,
}

/// Statistics about index population.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    /// Tiles currently stored.
    pub total_tiles: usize,
    /// Tiles holding at least one service.
    pub populated_tiles: usize,
    /// Sum of service assignments over all tiles.
    pub total_assignments: usize,
    /// Mean services per populated tile.
    pub avg_services_per_tile: f64,
    /// Largest service list of any tile.
    pub max_services_per_tile: usize,
    /// Approximate heap footprint in bytes.
    pub memory_bytes: usize,
}

/// Sorted tile array mapping coordinates to candidate services.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    config: IndexConfig,
    tiles: Vec<TileEntry>,
}

impl SpatialIndex {
    /// Create an empty index with the given capacities.
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            tiles: Vec::new(),
        }
    }

    /// Build an index covering every service of a catalog.
    ///
    /// A coverage box crossing the antimeridian is assigned to every tile of
    /// each level.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::IndexFull`] or [`AtlasError::TileFull`] when the
    /// catalog does not fit the configured capacities.
    pub fn build(catalog: &Catalog, config: IndexConfig) -> Result<Self> {
        let mut index = Self::new(config);

        for service in catalog.services() {
            let (lat_min, lat_max, lon_min, lon_max) = service.coverage.degrees();
            for level in 0..MAX_LEVELS {
                let (lo_lat, lo_lon, hi_lat, hi_lon) = if service.coverage.crosses_antimeridian() {
                    (-90.0, -180.0, 90.0, 180.0)
                } else {
                    (lat_min, lon_min, lat_max, lon_max)
                };
                let sw = TileKey::for_coordinate(lo_lat, lo_lon, level)?;
                let ne = TileKey::for_coordinate(hi_lat, hi_lon, level)?;

                for lat_tile in sw.lat_tile()..=ne.lat_tile() {
                    for lon_tile in sw.lon_tile()..=ne.lon_tile() {
                        index.insert(TileKey::new(level, lat_tile, lon_tile)?, service.id)?;
                    }
                }
            }
        }

        let stats = index.stats();
        tracing::debug!(
            tiles = stats.total_tiles,
            assignments = stats.total_assignments,
            max_per_tile = stats.max_services_per_tile,
            "spatial index built"
        );
        Ok(index)
    }

    /// Assign a service to a tile.
    ///
    /// Adding a service that is already present is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::IndexFull`] if a new tile is needed and the
    /// index is at capacity, or [`AtlasError::TileFull`] if the tile already
    /// holds the maximum number of services.
    pub fn insert(&mut self, key: TileKey, service: ServiceId) -> Result<()> {
        let pos = match self.tiles.binary_search_by_key(&key, |t| t.key) {
            Ok(pos) => pos,
            Err(pos) => {
                if self.tiles.len() >= self.config.max_tiles {
                    return Err(AtlasError::IndexFull {
                        max_tiles: self.config.max_tiles,
                    });
                }
                self.tiles.insert(
                    pos,
                    TileEntry {
                        key,
                        services: Vec::new(),
                    },
                );
                pos
            }
        };

        let entry = &mut self.tiles[pos];
        if entry.services.contains(&service) {
            return Ok(());
        }
        if entry.services.len() >= self.config.max_services_per_tile {
            return Err(AtlasError::TileFull {
                key: key.raw(),
                max: self.config.max_services_per_tile,
            });
        }
        entry.services.push(service);
        Ok(())
    }

    /// Services assigned to one tile, empty if the tile is unknown.
    pub fn tile(&self, key: TileKey) -> &[ServiceId] {
        self.tiles
            .binary_search_by_key(&key, |t| t.key)
            .map(|pos| self.tiles[pos].services.as_slice())
            .unwrap_or(&[])
    }

    /// Candidates at one specific level.
    ///
    /// The coordinate is rounded to centidegrees before it is mapped to a
    /// tile, the same precision the containment test uses.
    pub fn candidates_at_level(&self, lat: f64, lon: f64, level: u8) -> Result<&[ServiceId]> {
        validate_coordinates(lat, lon)?;
        let lat = to_centidegrees(lat) as f64 / CENTI;
        let lon = to_centidegrees(lon) as f64 / CENTI;
        Ok(self.tile(TileKey::for_coordinate(lat, lon, level)?))
    }

    /// Candidate services for a coordinate with hierarchical fallback.
    ///
    /// Returns the services of the finest-level tile that has any, together
    /// with that level. Returns an empty slice if no level has services.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidCoordinates`] for coordinates outside the
    /// WGS84 range.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let index = SpatialIndex::build(&catalog, IndexConfig::default())?;
    /// let (level, candidates) = index.candidates(-33.87, 151.21)?;
    /// println!("{} candidates at level {}", candidates.len(), level);
    /// ```
    pub fn candidates(&self, lat: f64, lon: f64) -> Result<(u8, &[ServiceId])> {
        for level in (0..=FINEST_LEVEL).rev() {
            let services = self.candidates_at_level(lat, lon, level)?;
            if !services.is_empty() {
                return Ok((level, services));
            }
        }
        Ok((0, &[]))
    }

    pub fn tiles(&self) -> &[TileEntry] {
        &self.tiles
    }

    pub fn config(&self) -> IndexConfig {
        self.config
    }

    /// Population statistics.
    pub fn stats(&self) -> IndexStats {
        let populated: Vec<_> = self.tiles.iter().filter(|t| !t.services.is_empty()).collect();
        let total_assignments: usize = populated.iter().map(|t| t.services.len()).sum();
        let max_services_per_tile = populated.iter().map(|t| t.services.len()).max().unwrap_or(0);

        IndexStats {
            total_tiles: self.tiles.len(),
            populated_tiles: populated.len(),
            total_assignments,
            avg_services_per_tile: if populated.is_empty() {
                0.0
            } else {
                total_assignments as f64 / populated.len() as f64
            },
            max_services_per_tile,
            memory_bytes: self.tiles.capacity() * std::mem::size_of::<TileEntry>()
                + total_assignments * std::mem::size_of::<ServiceId>(),
        }
    }
}
