//! Hierarchical tile keys.
//!
//! The globe is divided into five levels of increasing density. Level `L`
//! has `2·2^L` latitude rows and `4·2^L` longitude columns, from 2×4
//! continental tiles at level 0 down to 32×64 local tiles at level 4.
//!
//! A [`TileKey`] packs a tile's identity into 32 bits:
//!
//! ```text
//!  31   29 28         13 12          0
//! +-------+-------------+-------------+
//! | level | lat_tile+1  | lon_tile+1  |
//! +-------+-------------+-------------+
//! ```
//!
//! The `+1` bias keeps every valid key non-zero.

use std::fmt;
use std::num::NonZeroU32;

use crate::error::{AtlasError, Result};
use crate::geo::validate_coordinates;

/// Number of hierarchy levels.
pub const MAX_LEVELS: u8 = 5;

/// Finest level, tried first during lookup.
pub const FINEST_LEVEL: u8 = MAX_LEVELS - 1;

const LEVEL_SHIFT: u32 = 29;
const LAT_SHIFT: u32 = 13;
const INDEX_MASK: u32 = 0x1FFF;

/// Number of latitude rows at a level.
#[inline]
pub const fn lat_tiles(level: u8) -> u16 {
    2 << level
}

/// Number of longitude columns at a level.
#[inline]
pub const fn lon_tiles(level: u8) -> u16 {
    4 << level
}

/// Identity of one tile at one level.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey(NonZeroU32);

impl TileKey {
    /// Encode a tile key.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidParameter`] if the level is not below
    /// [`MAX_LEVELS`] or a tile index exceeds the level's dimensions.
    pub fn new(level: u8, lat_tile: u16, lon_tile: u16) -> Result<Self> {
        if level >= MAX_LEVELS {
            return Err(AtlasError::InvalidParameter(format!(
                "tile level {level} (max {})",
                MAX_LEVELS - 1
            )));
        }
        if lat_tile >= lat_tiles(level) || lon_tile >= lon_tiles(level) {
            return Err(AtlasError::InvalidParameter(format!(
                "tile {lat_tile}/{lon_tile} outside level {level}"
            )));
        }

        let raw = ((level as u32) << LEVEL_SHIFT)
            | ((lat_tile as u32 + 1) << LAT_SHIFT)
            | (lon_tile as u32 + 1);
        // lon_tile + 1 is at least 1, so raw is never zero
        Ok(Self(NonZeroU32::new(raw).ok_or_else(|| {
            AtlasError::InvalidParameter("zero tile key".into())
        })?))
    }

    /// Decode a raw key, returning `None` for zero or out-of-range keys.
    pub fn from_raw(raw: u32) -> Option<Self> {
        let level = (raw >> LEVEL_SHIFT) as u8;
        let lat = (raw >> LAT_SHIFT) & INDEX_MASK;
        let lon = raw & INDEX_MASK;
        if lat == 0 || lon == 0 {
            return None;
        }
        Self::new(level, (lat - 1) as u16, (lon - 1) as u16).ok()
    }

    /// The tile containing a coordinate at a given level.
    ///
    /// Coordinates on the north pole or the +180° meridian are clamped into
    /// the last row or column.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidCoordinates`] for coordinates outside
    /// the WGS84 range and [`AtlasError::InvalidParameter`] for a bad level.
    pub fn for_coordinate(lat: f64, lon: f64, level: u8) -> Result<Self> {
        validate_coordinates(lat, lon)?;
        if level >= MAX_LEVELS {
            return Err(AtlasError::InvalidParameter(format!("tile level {level}")));
        }

        let rows = lat_tiles(level);
        let cols = lon_tiles(level);
        let lat_tile = (((lat + 90.0) * rows as f64 / 180.0).floor() as u16).min(rows - 1);
        let lon_tile = (((lon + 180.0) * cols as f64 / 360.0).floor() as u16).min(cols - 1);
        Self::new(level, lat_tile, lon_tile)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0.get()
    }

    #[inline]
    pub fn level(self) -> u8 {
        (self.raw() >> LEVEL_SHIFT) as u8
    }

    #[inline]
    pub fn lat_tile(self) -> u16 {
        (((self.raw() >> LAT_SHIFT) & INDEX_MASK) - 1) as u16
    }

    #[inline]
    pub fn lon_tile(self) -> u16 {
        ((self.raw() & INDEX_MASK) - 1) as u16
    }

    /// Degree bounds as `(lat_min, lat_max, lon_min, lon_max)`.
    pub fn bounds(self) -> (f64, f64, f64, f64) {
        let lat_size = 180.0 / lat_tiles(self.level()) as f64;
        let lon_size = 360.0 / lon_tiles(self.level()) as f64;
        let lat_min = self.lat_tile() as f64 * lat_size - 90.0;
        let lon_min = self.lon_tile() as f64 * lon_size - 180.0;
        (lat_min, lat_min + lat_size, lon_min, lon_min + lon_size)
    }
}

impl fmt::Debug for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TileKey(L{} {}/{} {:#010x})",
            self.level(),
            self.lat_tile(),
            self.lon_tile(),
            self.raw()
        )
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}/{}/{}", self.level(), self.lat_tile(), self.lon_tile())
    }
}
