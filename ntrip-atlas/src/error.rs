//! Error types for the NTRIP Atlas library.

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::ServiceId;

/// Errors that can occur while building or querying the discovery engine.
#[derive(Error, Debug)]
pub enum AtlasError {
    /// IO error when reading or writing files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Service definitions could not be parsed.
    #[error("Invalid service definitions: {0}")]
    Definition(#[from] serde_yaml::Error),

    /// Coordinates are not finite or outside the valid WGS84 range.
    #[error("Invalid coordinates: lat={lat}, lon={lon} (valid: lat ±90°, lon ±180°)")]
    InvalidCoordinates { lat: f64, lon: f64 },

    /// A parameter other than a coordinate is malformed.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// No service covers the location, or none survived filtering.
    #[error("No usable service found for lat={lat}, lon={lon}")]
    NoServices { lat: f64, lon: f64 },

    /// Candidates exist but all of them are farther than the caller allows.
    #[error("Nearest candidate is {nearest_km:.1} km away (limit {max_km:.1} km)")]
    DistanceLimitExceeded { max_km: f64, nearest_km: f64 },

    /// The spatial index has no room for another tile.
    #[error("Spatial index full: {max_tiles} tiles")]
    IndexFull { max_tiles: usize },

    /// A single tile has no room for another service.
    #[error("Tile {key:#010x} full: {max} services")]
    TileFull { key: u32, max: usize },

    /// The credential store has no room for another provider.
    #[error("Credential store full: {capacity} entries")]
    CredentialStoreFull { capacity: usize },

    /// A service already holds the maximum number of mountpoints.
    #[error("Mountpoint table for service {service} full: {capacity} entries")]
    MountpointsFull { service: ServiceId, capacity: usize },

    /// The service identifier does not exist in the catalog.
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// The provider identifier does not exist in the catalog.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// A requested entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The database header was rejected.
    #[error("Incompatible database: {reason}")]
    VersionIncompatible { reason: String },

    /// The database body could not be decoded.
    #[error("Corrupt database {}: {reason}", path.as_ref().map(|p| p.display().to_string()).unwrap_or_default())]
    CorruptDatabase {
        path: Option<PathBuf>,
        reason: String,
    },

    /// A platform persistence hook failed.
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Coarse classification of an [`AtlasError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    NoServices,
    DistanceLimitExceeded,
    CapacityExceeded,
    NotFound,
    VersionIncompatible,
    Platform,
}

impl ErrorKind {
    /// Stable snake_case name, suitable for reports and CSV output.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::NoServices => "no_services",
            ErrorKind::DistanceLimitExceeded => "distance_limit_exceeded",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::NotFound => "not_found",
            ErrorKind::VersionIncompatible => "version_incompatible",
            ErrorKind::Platform => "platform",
        }
    }
}

impl AtlasError {
    /// The error kind a caller can branch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AtlasError::InvalidCoordinates { .. }
            | AtlasError::InvalidParameter(_)
            | AtlasError::Definition(_) => ErrorKind::InvalidParameter,
            AtlasError::NoServices { .. } => ErrorKind::NoServices,
            AtlasError::DistanceLimitExceeded { .. } => ErrorKind::DistanceLimitExceeded,
            AtlasError::IndexFull { .. }
            | AtlasError::TileFull { .. }
            | AtlasError::CredentialStoreFull { .. }
            | AtlasError::MountpointsFull { .. } => ErrorKind::CapacityExceeded,
            AtlasError::UnknownService(_)
            | AtlasError::UnknownProvider(_)
            | AtlasError::NotFound(_) => ErrorKind::NotFound,
            AtlasError::VersionIncompatible { .. } | AtlasError::CorruptDatabase { .. } => {
                ErrorKind::VersionIncompatible
            }
            AtlasError::Io(_) | AtlasError::Platform(_) => ErrorKind::Platform,
        }
    }
}

/// Result type alias using [`AtlasError`].
pub type Result<T> = std::result::Result<T, AtlasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AtlasError::InvalidCoordinates {
            lat: 91.0,
            lon: 0.0,
        };
        assert!(err.to_string().contains("91"));

        let err = AtlasError::TileFull { key: 0x2000_2001, max: 64 };
        assert!(err.to_string().contains("0x20002001"));
        assert!(err.to_string().contains("64"));

        let err = AtlasError::CorruptDatabase {
            path: Some(PathBuf::from("atlas.db")),
            reason: "truncated".into(),
        };
        assert!(err.to_string().contains("atlas.db"));
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            AtlasError::IndexFull { max_tiles: 4 }.kind(),
            ErrorKind::CapacityExceeded
        );
        assert_eq!(
            AtlasError::TileFull { key: 1, max: 4 }.kind(),
            ErrorKind::CapacityExceeded
        );
        assert_eq!(
            AtlasError::UnknownProvider("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AtlasError::NoServices { lat: 0.0, lon: 0.0 }.kind(),
            ErrorKind::NoServices
        );
        assert_eq!(AtlasError::Platform("disk".into()).kind(), ErrorKind::Platform);
        assert_eq!(ErrorKind::DistanceLimitExceeded.as_str(), "distance_limit_exceeded");
    }
}
