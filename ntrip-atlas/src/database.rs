//! Compiled catalog databases.
//!
//! A database file is a 16-byte [`DatabaseHeader`] followed by the provider
//! table and the packed service records. All integers are little-endian.
//!
//! ```text
//! header    magic u32 | major u16 | minor u16 | date u32 | seq u8 | features u8 | count u16
//! providers count u16, then per provider: len u8, UTF-8 bytes
//! services  per service: name (len u8 + bytes), hostname (len u8 + bytes),
//!           port u16, flags u8, lat_min i16, lat_max i16, lon_min i16,
//!           lon_max i16, provider u8, network u8, quality u8
//! ```
//!
//! Files are memory-mapped on open and decoded into an owned [`Catalog`].
//! [`TieredDatabase`](crate::tiered::TieredDatabase) keeps the mapping
//! instead and decodes records on demand.

use std::fs::{self, File};
use std::path::Path;

use bitflags::bitflags;
use memmap2::Mmap;

use crate::catalog::{Access, AuthMethod, Catalog, NetworkClass, ServiceRecord};
use crate::error::{AtlasError, Result};
use crate::geo::BoundingBox;

/// Magic number identifying a database file (`"NTAT"`).
pub const DB_MAGIC: u32 = u32::from_le_bytes(*b"NTAT");

/// Schema major version written and understood by this library.
pub const SCHEMA_MAJOR: u16 = 1;

/// Schema minor version written and understood by this library.
pub const SCHEMA_MINOR: u16 = 1;

/// Size of an encoded header.
pub const HEADER_LEN: usize = 16;

/// Largest service count a header may declare.
pub const MAX_SERVICES: u16 = 10_000;

/// Highest daily sequence number.
pub const MAX_SEQUENCE: u8 = 99;

bitflags! {
    /// Optional database features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DatabaseFeatures: u8 {
        const COMPACT_FAILURES = 0x01;
        const GEOGRAPHIC_INDEX = 0x02;
        const EXTENDED_AUTH = 0x04;
        const TIERED_LOADING = 0x08;
        const EXPERIMENTAL = 0x80;
    }
}

impl DatabaseFeatures {
    /// Features this library implements.
    pub const SUPPORTED: DatabaseFeatures = DatabaseFeatures::COMPACT_FAILURES
        .union(DatabaseFeatures::GEOGRAPHIC_INDEX)
        .union(DatabaseFeatures::EXTENDED_AUTH)
        .union(DatabaseFeatures::TIERED_LOADING);
}

bitflags! {
    /// Per-service flag byte of a packed record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ServiceFlags: u8 {
        const SSL = 0x01;
        const AUTH_BASIC = 0x02;
        const AUTH_DIGEST = 0x04;
        const REQUIRES_REG = 0x08;
        const FREE_ACCESS = 0x10;
        const PAID_SERVICE = 0x20;
        const GLOBAL_SERVICE = 0x40;
    }
}

/// How well a database matches this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Every feature of the database is understood.
    Compatible,
    /// The database is newer; unknown features are ignored.
    BackwardOnly,
}

impl Compatibility {
    pub fn message(self) -> &'static str {
        match self {
            Compatibility::Compatible => "database fully compatible",
            Compatibility::BackwardOnly => {
                "database is newer than this library; unknown features are ignored"
            }
        }
    }
}

/// Versioned database header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub magic: u32,
    pub schema_major: u16,
    pub schema_minor: u16,
    /// Build date as `YYYYMMDD`.
    pub build_date: u32,
    /// Build number within the day, `0..=99`.
    pub sequence: u8,
    pub features: DatabaseFeatures,
    pub service_count: u16,
}

impl DatabaseHeader {
    /// A header for the current schema with every supported feature.
    pub fn new(build_date: u32, sequence: u8, service_count: u16) -> Self {
        Self {
            magic: DB_MAGIC,
            schema_major: SCHEMA_MAJOR,
            schema_minor: SCHEMA_MINOR,
            build_date,
            sequence,
            features: DatabaseFeatures::SUPPORTED,
            service_count,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.schema_major.to_le_bytes());
        out[6..8].copy_from_slice(&self.schema_minor.to_le_bytes());
        out[8..12].copy_from_slice(&self.build_date.to_le_bytes());
        out[12] = self.sequence;
        out[13] = self.features.bits();
        out[14..16].copy_from_slice(&self.service_count.to_le_bytes());
        out
    }

    /// Decode a header without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::CorruptDatabase`] if fewer than
    /// [`HEADER_LEN`] bytes are given.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(AtlasError::CorruptDatabase {
                path: None,
                reason: format!("header is {} bytes (expected {HEADER_LEN})", bytes.len()),
            });
        }
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        Ok(Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            schema_major: u16_at(4),
            schema_minor: u16_at(6),
            build_date: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            sequence: bytes[12],
            features: DatabaseFeatures::from_bits_retain(bytes[13]),
            service_count: u16_at(14),
        })
    }

    /// Structural checks on header fields.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::VersionIncompatible`] for a wrong magic number
    /// or a zero major version, and [`AtlasError::InvalidParameter`] for a
    /// sequence above 99 or a service count of 0 or above 10 000.
    pub fn validate(&self) -> Result<()> {
        if self.magic != DB_MAGIC {
            return Err(AtlasError::VersionIncompatible {
                reason: format!("bad magic number {:#010x}", self.magic),
            });
        }
        if self.schema_major == 0 {
            return Err(AtlasError::VersionIncompatible {
                reason: "schema major version 0".into(),
            });
        }
        if self.sequence > MAX_SEQUENCE {
            return Err(AtlasError::InvalidParameter(format!(
                "sequence {} above {MAX_SEQUENCE}",
                self.sequence
            )));
        }
        if self.service_count == 0 || self.service_count > MAX_SERVICES {
            return Err(AtlasError::InvalidParameter(format!(
                "service count {} outside 1..={MAX_SERVICES}",
                self.service_count
            )));
        }
        Ok(())
    }

    /// Compare the header against this library's schema.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::VersionIncompatible`] for a wrong magic number
    /// or a database major version newer than the library's.
    pub fn compatibility(&self) -> Result<Compatibility> {
        if self.magic != DB_MAGIC {
            return Err(AtlasError::VersionIncompatible {
                reason: format!("bad magic number {:#010x}", self.magic),
            });
        }

        let compat = match self.schema_major.cmp(&SCHEMA_MAJOR) {
            std::cmp::Ordering::Less => Compatibility::Compatible,
            std::cmp::Ordering::Equal if self.schema_minor <= SCHEMA_MINOR => {
                Compatibility::Compatible
            }
            std::cmp::Ordering::Equal => Compatibility::BackwardOnly,
            std::cmp::Ordering::Greater => {
                return Err(AtlasError::VersionIncompatible {
                    reason: format!(
                        "database schema {}.{} needs a library supporting major version {}",
                        self.schema_major, self.schema_minor, self.schema_major
                    ),
                })
            }
        };

        let unsupported = self.features.bits() & !DatabaseFeatures::SUPPORTED.bits();
        if compat == Compatibility::Compatible && unsupported != 0 {
            return Ok(Compatibility::BackwardOnly);
        }
        Ok(compat)
    }

    pub fn supports(&self, feature: DatabaseFeatures) -> bool {
        self.features.contains(feature)
    }

    /// Version string such as `1.1 (20241130.02)`.
    pub fn version_string(&self) -> String {
        format!(
            "{}.{} ({}.{:02})",
            self.schema_major, self.schema_minor, self.build_date, self.sequence
        )
    }
}

/// Encode a catalog into database bytes.
///
/// # Errors
///
/// Returns [`AtlasError::InvalidParameter`] if the header would be invalid
/// or a string does not fit its length byte.
pub fn encode_catalog(catalog: &Catalog, build_date: u32, sequence: u8) -> Result<Vec<u8>> {
    let count = u16::try_from(catalog.len())
        .map_err(|_| AtlasError::InvalidParameter("too many services".into()))?;
    let header = DatabaseHeader::new(build_date, sequence, count);
    header.validate()?;

    let mut out = Vec::with_capacity(HEADER_LEN + catalog.len() * 48);
    out.extend_from_slice(&header.encode());

    out.extend_from_slice(&(catalog.providers().len() as u16).to_le_bytes());
    for provider in catalog.providers() {
        put_str(&mut out, provider)?;
    }

    for s in catalog.services() {
        put_str(&mut out, &s.name)?;
        put_str(&mut out, &s.hostname)?;
        out.extend_from_slice(&s.port.to_le_bytes());
        out.push(pack_flags(s).bits());
        for v in [
            s.coverage.lat_min,
            s.coverage.lat_max,
            s.coverage.lon_min,
            s.coverage.lon_max,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.push(s.provider);
        out.push(s.network.code());
        out.push(s.quality);
    }

    Ok(out)
}

/// Encode a catalog and write it to a file.
pub fn write_catalog<P: AsRef<Path>>(
    path: P,
    catalog: &Catalog,
    build_date: u32,
    sequence: u8,
) -> Result<DatabaseHeader> {
    let bytes = encode_catalog(catalog, build_date, sequence)?;
    fs::write(&path, &bytes)?;
    tracing::info!(
        path = %path.as_ref().display(),
        services = catalog.len(),
        bytes = bytes.len(),
        "database written"
    );
    DatabaseHeader::decode(&bytes)
}

fn put_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u8::try_from(s.len())
        .map_err(|_| AtlasError::InvalidParameter(format!("string too long: '{s}'")))?;
    out.push(len);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn pack_flags(s: &ServiceRecord) -> ServiceFlags {
    let mut flags = ServiceFlags::empty();
    flags.set(ServiceFlags::SSL, s.ssl);
    flags.set(ServiceFlags::AUTH_BASIC, s.auth == AuthMethod::Basic);
    flags.set(ServiceFlags::AUTH_DIGEST, s.auth == AuthMethod::Digest);
    flags.set(ServiceFlags::REQUIRES_REG, s.requires_registration);
    flags.set(ServiceFlags::FREE_ACCESS, s.access == Access::Free);
    flags.set(ServiceFlags::PAID_SERVICE, s.access == Access::Paid);
    flags.set(ServiceFlags::GLOBAL_SERVICE, s.global);
    flags
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| AtlasError::CorruptDatabase {
            path: None,
            reason: format!("truncated at byte {}", self.pos),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AtlasError::CorruptDatabase {
            path: None,
            reason: format!("invalid UTF-8 before byte {}", self.pos),
        })
    }
}

fn decode_service(r: &mut Reader<'_>) -> Result<ServiceRecord> {
    let name = r.string()?;
    let hostname = r.string()?;
    let port = r.u16()?;
    let flags = ServiceFlags::from_bits_truncate(r.u8()?);
    let (lat_min, lat_max, lon_min, lon_max) = (r.i16()?, r.i16()?, r.i16()?, r.i16()?);
    let provider = r.u8()?;
    let network_code = r.u8()?;
    let quality = r.u8()?;

    let network = NetworkClass::from_code(network_code).ok_or_else(|| {
        AtlasError::CorruptDatabase {
            path: None,
            reason: format!("service '{name}' has unknown network code {network_code}"),
        }
    })?;
    let coverage = BoundingBox::new(lat_min, lat_max, lon_min, lon_max).map_err(|e| {
        AtlasError::CorruptDatabase {
            path: None,
            reason: format!("service '{name}': {e}"),
        }
    })?;

    let auth = if flags.contains(ServiceFlags::AUTH_DIGEST) {
        AuthMethod::Digest
    } else if flags.contains(ServiceFlags::AUTH_BASIC) {
        AuthMethod::Basic
    } else {
        AuthMethod::None
    };

    Ok(ServiceRecord {
        ssl: flags.contains(ServiceFlags::SSL),
        auth,
        requires_registration: flags.contains(ServiceFlags::REQUIRES_REG),
        access: if flags.contains(ServiceFlags::PAID_SERVICE) {
            Access::Paid
        } else {
            Access::Free
        },
        global: flags.contains(ServiceFlags::GLOBAL_SERVICE),
        provider,
        network,
        quality,
        ..ServiceRecord::new(&name, &hostname, port, coverage)
    })
}

/// Validate the header and read the provider table.
///
/// Returns the header, its compatibility, the providers and the offset of
/// the first service record.
pub(crate) fn read_prelude(bytes: &[u8]) -> Result<(DatabaseHeader, Compatibility, Vec<String>, usize)> {
    let header = DatabaseHeader::decode(bytes)?;
    header.validate()?;
    let compatibility = header.compatibility()?;
    if compatibility == Compatibility::BackwardOnly {
        tracing::warn!(
            version = %header.version_string(),
            "{}",
            compatibility.message()
        );
    }

    let mut r = Reader {
        bytes,
        pos: HEADER_LEN,
    };
    let provider_count = r.u16()? as usize;
    let providers = (0..provider_count)
        .map(|_| r.string())
        .collect::<Result<Vec<_>>>()?;
    Ok((header, compatibility, providers, r.pos))
}

/// Decode the service record starting at `*pos`, advancing past it.
pub(crate) fn decode_service_at(bytes: &[u8], pos: &mut usize) -> Result<ServiceRecord> {
    let mut r = Reader { bytes, pos: *pos };
    let record = decode_service(&mut r)?;
    *pos = r.pos;
    Ok(record)
}

/// Name the file in a corruption error.
pub(crate) fn with_path(e: AtlasError, path: &Path) -> AtlasError {
    match e {
        AtlasError::CorruptDatabase { reason, .. } => AtlasError::CorruptDatabase {
            path: Some(path.to_path_buf()),
            reason,
        },
        other => other,
    }
}

/// A decoded database.
#[derive(Debug, Clone)]
pub struct Database {
    header: DatabaseHeader,
    compatibility: Compatibility,
    catalog: Catalog,
}

impl Database {
    /// Decode a database from bytes.
    ///
    /// The header is validated and checked for compatibility before the body
    /// is read.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::VersionIncompatible`] or
    /// [`AtlasError::InvalidParameter`] for a rejected header and
    /// [`AtlasError::CorruptDatabase`] for a malformed body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, compatibility, providers, mut pos) = read_prelude(bytes)?;
        let services = (0..header.service_count)
            .map(|_| decode_service_at(bytes, &mut pos))
            .collect::<Result<Vec<_>>>()?;

        let catalog = Catalog::new(providers, services).map_err(|e| AtlasError::CorruptDatabase {
            path: None,
            reason: e.to_string(),
        })?;

        Ok(Self {
            header,
            compatibility,
            catalog,
        })
    }

    /// Memory-map and decode a database file.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use ntrip_atlas::Database;
    ///
    /// let db = Database::open("/var/lib/ntrip-atlas/services.db")?;
    /// println!("{} services, schema {}", db.catalog().len(), db.header().version_string());
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;

        // SAFETY: The file is opened read-only and the mapping is dropped
        // before this function returns.
        let mmap = unsafe { Mmap::map(&file)? };

        Self::from_bytes(&mmap).map_err(|e| with_path(e, path.as_ref()))
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    pub fn compatibility(&self) -> Compatibility {
        self.compatibility
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }
}
