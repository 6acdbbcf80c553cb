//! # NTRIP Atlas - Geographic Service Discovery
//!
//! Finds the best NTRIP correction service for a position from a compact
//! catalog of casters and their coverage areas.
//!
//! ## Features
//!
//! - **Fast**: A five-level tile index answers lookups by binary search, with
//!   no allocation
//! - **Precise**: Every index candidate is verified against its real coverage
//!   box before it is ranked
//! - **Reliable**: Failing services back off along a tunable ladder, and
//!   services that report no coverage are blacklisted per 1° cell
//! - **Offline**: Catalogs compile to a small versioned database that is
//!   memory-mapped on load
//! - **Lean**: A tiered view of the database keeps only coverage and class
//!   resident and decodes endpoints on demand
//!
//! ## Quick Start
//!
//! ```ignore
//! use ntrip_atlas::{EngineBuilder, Mountpoint, SelectionCriteria};
//!
//! let mut engine = EngineBuilder::new().database("services.db").build()?;
//!
//! // Candidates covering Sydney, best first
//! for service in engine.rank(-33.87, 151.21, &SelectionCriteria::default())? {
//!     println!("{} ({:.0} km, score {:.1})", service.name, service.center_km, service.score);
//! }
//!
//! // Mountpoints come from the caster's sourcetable
//! let auscors = engine.catalog().find("auscors")?.id;
//! engine.ingest_mountpoints(auscors, vec![Mountpoint::new("SYDN00AUS0", -33.87, 151.21, "RTCM 3.2")])?;
//! let best = engine.find_best(-33.87, 151.21)?;
//! println!("{}:{}/{}", best.server, best.port, best.mountpoint);
//! ```
//!
//! ## Pipeline
//!
//! Each query narrows the catalog in stages:
//!
//! 1. The spatial index lists services assigned to the point's tile,
//!    falling back from level 4 (local) to level 0 (continental)
//! 2. Candidates are checked against their bounding box
//! 3. Backed-off and blacklisted services are dropped
//! 4. Paid services without credentials and placeholder hosts are marked
//!    unusable
//! 5. The rest are scored and ordered by payment priority

pub mod backoff;
pub mod blacklist;
pub mod catalog;
pub mod coverage;
pub mod credentials;
pub mod database;
pub mod definition;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod geo;
pub mod index;
pub mod mountpoint;
pub mod platform;
pub mod select;
pub mod tiered;
pub mod tile;

#[cfg(feature = "geojson")]
pub mod geojson;

// Re-export main types at crate root for convenience
pub use backoff::{BackoffConfig, FailureReport, FailureState};
pub use catalog::{Access, AuthMethod, Catalog, NetworkClass, ServiceId, ServiceRecord};
pub use coverage::Coverage;
pub use credentials::{Credential, CredentialStore};
pub use database::{Database, DatabaseHeader};
pub use engine::{load_catalog, DiscoveryEngine, EngineBuilder};
pub use error::{AtlasError, ErrorKind, Result};
pub use geo::{BoundingBox, GridCell};
pub use index::{IndexConfig, SpatialIndex};
pub use mountpoint::Mountpoint;
pub use platform::{FilePlatform, MemoryPlatform, Platform, SystemPlatform};
pub use eligibility::PaymentPriority;
pub use select::{BestService, RankedService, SelectionCriteria};
pub use tiered::{TieredConfig, TieredDatabase, TieredStats};
pub use tile::TileKey;
