//! Geodesic helpers and fixed-point coverage boxes.
//!
//! Service coverage is stored in centidegrees (0.01°) so a whole bounding box
//! fits in eight bytes. Distances use the haversine formula on a spherical
//! Earth, which is accurate to well under one percent at the scales that
//! matter for picking a correction service.

use serde::Serialize;

use crate::error::{AtlasError, Result};

/// Mean Earth radius used by every distance computation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Centidegrees per degree.
pub const CENTI: f64 = 100.0;

/// Check that a coordinate is finite and inside the WGS84 range.
///
/// # Errors
///
/// Returns [`AtlasError::InvalidCoordinates`] for NaN, infinities, or values
/// outside `[-90, 90] × [-180, 180]`.
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<()> {
    if !lat.is_finite()
        || !lon.is_finite()
        || !(-90.0..=90.0).contains(&lat)
        || !(-180.0..=180.0).contains(&lon)
    {
        return Err(AtlasError::InvalidCoordinates { lat, lon });
    }
    Ok(())
}

/// Convert degrees to the nearest centidegree.
#[inline]
pub fn to_centidegrees(deg: f64) -> i32 {
    (deg * CENTI).round() as i32
}

/// Great-circle distance in kilometres between two points.
///
/// # Example
///
/// ```ignore
/// use ntrip_atlas::geo::haversine_km;
///
/// let d = haversine_km(-33.87, 151.21, -37.81, 144.96); // Sydney to Melbourne
/// assert!((d - 713.0).abs() < 5.0);
/// ```
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Absolute longitude difference in degrees, taking the short way round.
fn lon_separation(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// A rectangular coverage area in centidegrees.
///
/// Latitude bounds are always ordered. A box whose `lon_max` is smaller than
/// its `lon_min` crosses the antimeridian: it covers `lon_min..=180` and
/// `-180..=lon_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BoundingBox {
    /// Southern boundary.
    pub lat_min: i16,
    /// Northern boundary.
    pub lat_max: i16,
    /// Western boundary.
    pub lon_min: i16,
    /// Eastern boundary.
    pub lon_max: i16,
}

impl BoundingBox {
    /// The whole globe.
    pub const GLOBAL: BoundingBox = BoundingBox {
        lat_min: -9000,
        lat_max: 9000,
        lon_min: -18000,
        lon_max: 18000,
    };

    /// Create a bounding box from centidegree bounds.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidParameter`] if a bound is out of range or
    /// the latitude bounds are reversed.
    pub fn new(lat_min: i16, lat_max: i16, lon_min: i16, lon_max: i16) -> Result<Self> {
        let lat_ok = |v: i16| (-9000..=9000).contains(&v);
        let lon_ok = |v: i16| (-18000..=18000).contains(&v);
        if !lat_ok(lat_min) || !lat_ok(lat_max) || !lon_ok(lon_min) || !lon_ok(lon_max) {
            return Err(AtlasError::InvalidParameter(format!(
                "bounding box out of range: lat {lat_min}..{lat_max}, lon {lon_min}..{lon_max}"
            )));
        }
        if lat_min > lat_max {
            return Err(AtlasError::InvalidParameter(format!(
                "bounding box latitude reversed: {lat_min} > {lat_max}"
            )));
        }
        Ok(Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        })
    }

    /// Create a bounding box from bounds in degrees, rounded to centidegrees.
    ///
    /// # Arguments
    ///
    /// * `lat_min` - Southern boundary latitude
    /// * `lat_max` - Northern boundary latitude
    /// * `lon_min` - Western boundary longitude
    /// * `lon_max` - Eastern boundary longitude
    pub fn from_degrees(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Result<Self> {
        for (lat, lon) in [(lat_min, lon_min), (lat_max, lon_max)] {
            validate_coordinates(lat, lon)?;
        }
        Self::new(
            to_centidegrees(lat_min) as i16,
            to_centidegrees(lat_max) as i16,
            to_centidegrees(lon_min) as i16,
            to_centidegrees(lon_max) as i16,
        )
    }

    /// Whether the box wraps across the ±180° meridian.
    #[inline]
    pub fn crosses_antimeridian(&self) -> bool {
        self.lon_max < self.lon_min
    }

    /// Bounds in degrees as `(lat_min, lat_max, lon_min, lon_max)`.
    pub fn degrees(&self) -> (f64, f64, f64, f64) {
        (
            self.lat_min as f64 / CENTI,
            self.lat_max as f64 / CENTI,
            self.lon_min as f64 / CENTI,
            self.lon_max as f64 / CENTI,
        )
    }

    fn lon_in_range(&self, lon_cd: i32) -> bool {
        let (min, max) = (self.lon_min as i32, self.lon_max as i32);
        let within = |v: i32| {
            if self.crosses_antimeridian() {
                v >= min || v <= max
            } else {
                (min..=max).contains(&v)
            }
        };
        // -180 and 180 are the same meridian
        match lon_cd {
            -18000 | 18000 => within(-18000) || within(18000),
            _ => within(lon_cd),
        }
    }

    /// Check whether a coordinate lies inside the box.
    ///
    /// The coordinate is rounded to centidegrees first, matching the
    /// precision the bounds are stored at. Both edges are inclusive.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        let lat_cd = to_centidegrees(lat);
        let lon_cd = to_centidegrees(lon);
        (self.lat_min as i32..=self.lat_max as i32).contains(&lat_cd) && self.lon_in_range(lon_cd)
    }

    /// Geometric center of the box in degrees.
    pub fn center(&self) -> (f64, f64) {
        let (lat_min, lat_max, lon_min, lon_max) = self.degrees();
        let lat = (lat_min + lat_max) / 2.0;
        let lon = if self.crosses_antimeridian() {
            let mid = lon_min + (lon_max + 360.0 - lon_min) / 2.0;
            if mid > 180.0 {
                mid - 360.0
            } else {
                mid
            }
        } else {
            (lon_min + lon_max) / 2.0
        };
        (lat, lon)
    }

    /// Distance from a coordinate to the center of the box, in kilometres.
    pub fn center_distance_km(&self, lat: f64, lon: f64) -> f64 {
        let (c_lat, c_lon) = self.center();
        haversine_km(lat, lon, c_lat, c_lon)
    }

    /// Distance from a coordinate to the nearest point of the box.
    ///
    /// Returns `0.0` when [`contains`](Self::contains) holds. Otherwise the
    /// coordinate is clamped onto the rectangle and the haversine distance to
    /// that clamped point is returned.
    pub fn edge_distance_km(&self, lat: f64, lon: f64) -> f64 {
        if self.contains(lat, lon) {
            return 0.0;
        }

        let (lat_min, lat_max, lon_min, lon_max) = self.degrees();
        let near_lat = lat.clamp(lat_min, lat_max);
        let near_lon = if self.lon_in_range(to_centidegrees(lon)) {
            lon
        } else if lon_separation(lon, lon_min) <= lon_separation(lon, lon_max) {
            lon_min
        } else {
            lon_max
        };

        haversine_km(lat, lon, near_lat, near_lon)
    }

    /// Longitude spans of the box as one or two non-wrapping ranges.
    fn lon_spans(&self) -> [(i16, i16); 2] {
        if self.crosses_antimeridian() {
            [(self.lon_min, 18000), (-18000, self.lon_max)]
        } else {
            [(self.lon_min, self.lon_max), (self.lon_min, self.lon_max)]
        }
    }

    /// Check whether two boxes share any area (edges count).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        if self.lat_min > other.lat_max || other.lat_min > self.lat_max {
            return false;
        }
        self.lon_spans().iter().any(|&(a_min, a_max)| {
            other
                .lon_spans()
                .iter()
                .any(|&(b_min, b_max)| a_min <= b_max && b_min <= a_max)
        })
    }
}

/// One 1°×1° cell of the blacklist grid.
///
/// Cells are named by the floor of their south-west corner, so `-74.5`
/// belongs to cell `-75`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GridCell {
    pub lat: i16,
    pub lon: i16,
}

impl GridCell {
    /// The cell containing a coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidCoordinates`] for coordinates outside the
    /// WGS84 range.
    ///
    /// Longitude 180 is the same meridian as -180 and lands in cell `-180`.
    /// The pole at latitude 90 lands in the northernmost cell `89`.
    pub fn containing(lat: f64, lon: f64) -> Result<Self> {
        validate_coordinates(lat, lon)?;
        let lon = lon.floor() as i16;
        Ok(Self {
            lat: (lat.floor() as i16).min(89),
            lon: if lon >= 180 { lon - 360 } else { lon },
        })
    }
}
