//! Tiered access to a compiled database.
//!
//! Opening a [`TieredDatabase`] decodes only the discovery tier: coverage,
//! network class, quality and access flags of every service. Hostnames,
//! ports and names stay in the mapped file until a query needs them, and
//! are then kept in two small bounded caches.
//!
//! ```ignore
//! use ntrip_atlas::tiered::{TieredConfig, TieredDatabase};
//! use ntrip_atlas::SelectionCriteria;
//!
//! let db = TieredDatabase::open("services.db", TieredConfig::default())?;
//! let best = db.find_best(-33.87, 151.21, &SelectionCriteria::default(), None)?;
//! println!("{}:{}", best.endpoint.hostname, best.endpoint.port);
//!
//! let stats = db.stats();
//! println!("{} of {} bytes resident", stats.total_bytes(), stats.full_bytes);
//! ```

use std::fs::File;
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use moka::sync::Cache;
use serde::Serialize;

use crate::catalog::{Access, AuthMethod, Catalog, NetworkClass, ServiceId, ServiceRecord};
use crate::credentials::CredentialStore;
use crate::database::{
    decode_service_at, read_prelude, with_path, Compatibility, DatabaseFeatures, DatabaseHeader,
};
use crate::eligibility::{is_placeholder_hostname, PaymentPriority};
use crate::error::{AtlasError, Result};
use crate::geo::{validate_coordinates, BoundingBox};
use crate::select::SelectionCriteria;

/// Default number of cached endpoints.
pub const DEFAULT_ENDPOINT_CACHE: u64 = 4;

/// Default number of cached metadata entries.
pub const DEFAULT_METADATA_CACHE: u64 = 2;

/// Cache sizes and ordering for a [`TieredDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TieredConfig {
    pub endpoint_cache: u64,
    pub metadata_cache: u64,
    pub priority: PaymentPriority,
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            endpoint_cache: DEFAULT_ENDPOINT_CACHE,
            metadata_cache: DEFAULT_METADATA_CACHE,
            priority: PaymentPriority::FreeFirst,
        }
    }
}

/// Discovery tier: what selection needs, without any strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiscoveryEntry {
    pub id: ServiceId,
    pub coverage: BoundingBox,
    pub provider: u8,
    pub network: NetworkClass,
    pub quality: u8,
    pub auth: AuthMethod,
    pub access: Access,
    pub ssl: bool,
    pub requires_registration: bool,
}

impl DiscoveryEntry {
    fn from_record(record: &ServiceRecord, id: ServiceId) -> Self {
        Self {
            id,
            coverage: record.coverage,
            provider: record.provider,
            network: record.network,
            quality: record.quality,
            auth: record.auth,
            access: record.access,
            ssl: record.ssl,
            requires_registration: record.requires_registration,
        }
    }

    #[inline]
    pub fn is_paid(&self) -> bool {
        self.access == Access::Paid
    }
}

/// Endpoint tier: where to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub hostname: String,
    pub port: u16,
    pub ssl: bool,
}

impl ServiceEndpoint {
    fn memory_bytes(&self) -> usize {
        mem::size_of::<Self>() + self.hostname.len()
    }
}

/// Metadata tier: names for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceMetadata {
    pub name: String,
    pub provider: String,
    pub global: bool,
}

impl ServiceMetadata {
    fn memory_bytes(&self) -> usize {
        mem::size_of::<Self>() + self.name.len() + self.provider.len()
    }
}

/// Result of [`TieredDatabase::find_best`].
#[derive(Debug, Clone, PartialEq)]
pub struct TieredSelection {
    pub service: ServiceId,
    pub endpoint: Arc<ServiceEndpoint>,
    pub auth: AuthMethod,
    pub quality: u8,
    pub requires_registration: bool,
    pub center_km: f64,
    pub score: f64,
}

/// Memory and cache counters of a [`TieredDatabase`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TieredStats {
    pub services: usize,
    /// Resident discovery tier.
    pub discovery_bytes: usize,
    pub endpoint_entries: usize,
    pub endpoint_bytes: usize,
    pub metadata_entries: usize,
    pub metadata_bytes: usize,
    pub endpoint_hits: u64,
    pub endpoint_misses: u64,
    pub metadata_hits: u64,
    pub metadata_misses: u64,
    /// Footprint with every tier of every service resident.
    pub full_bytes: usize,
}

impl TieredStats {
    pub fn total_bytes(&self) -> usize {
        self.discovery_bytes + self.endpoint_bytes + self.metadata_bytes
    }

    /// Saving against [`full_bytes`](Self::full_bytes), in percent.
    pub fn reduction_percent(&self) -> f64 {
        if self.full_bytes == 0 {
            return 0.0;
        }
        let saved = self.full_bytes.saturating_sub(self.total_bytes());
        saved as f64 * 100.0 / self.full_bytes as f64
    }

    pub fn endpoint_hit_rate(&self) -> f64 {
        hit_rate(self.endpoint_hits, self.endpoint_misses)
    }

    pub fn metadata_hit_rate(&self) -> f64 {
        hit_rate(self.metadata_hits, self.metadata_misses)
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

enum Storage {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Mapped(mmap) => &mmap[..],
            Storage::Owned(bytes) => &bytes[..],
        }
    }
}

/// A compiled database with on-demand endpoint and metadata decoding.
pub struct TieredDatabase {
    header: DatabaseHeader,
    compatibility: Compatibility,
    storage: Storage,
    providers: Vec<String>,
    index: Vec<DiscoveryEntry>,
    /// Byte offset of each service record.
    offsets: Vec<usize>,
    /// String bytes of every record, for the full-load footprint.
    string_bytes: usize,
    config: TieredConfig,
    endpoints: Cache<ServiceId, Arc<ServiceEndpoint>>,
    metadata: Cache<ServiceId, Arc<ServiceMetadata>>,
    endpoint_hits: AtomicU64,
    endpoint_misses: AtomicU64,
    metadata_hits: AtomicU64,
    metadata_misses: AtomicU64,
}

impl TieredDatabase {
    /// Memory-map a database file and decode its discovery tier.
    ///
    /// The mapping stays open for the lifetime of the value.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::VersionIncompatible`] if the database was built
    /// without [`DatabaseFeatures::TIERED_LOADING`], plus every error of
    /// [`Database::from_bytes`](crate::Database::from_bytes).
    pub fn open<P: AsRef<Path>>(path: P, config: TieredConfig) -> Result<Self> {
        let file = File::open(&path)?;

        // SAFETY: The file is mapped read-only and must not be modified
        // while the database is open.
        let mmap = unsafe { Mmap::map(&file)? };

        Self::from_storage(Storage::Mapped(mmap), config).map_err(|e| with_path(e, path.as_ref()))
    }

    /// Decode the discovery tier of in-memory database bytes.
    pub fn from_bytes(bytes: Vec<u8>, config: TieredConfig) -> Result<Self> {
        Self::from_storage(Storage::Owned(bytes), config)
    }

    fn from_storage(storage: Storage, config: TieredConfig) -> Result<Self> {
        let bytes = storage.bytes();
        let (header, compatibility, providers, mut pos) = read_prelude(bytes)?;
        if !header.supports(DatabaseFeatures::TIERED_LOADING) {
            return Err(AtlasError::VersionIncompatible {
                reason: format!(
                    "database {} was built without tiered loading",
                    header.version_string()
                ),
            });
        }

        let count = header.service_count as usize;
        let mut index = Vec::with_capacity(count);
        let mut offsets = Vec::with_capacity(count);
        let mut string_bytes = 0;
        for i in 0..header.service_count {
            offsets.push(pos);
            let record = decode_service_at(bytes, &mut pos)?;
            let corrupt = |what: &str| AtlasError::CorruptDatabase {
                path: None,
                reason: format!("service '{}': {what}", record.name),
            };
            let Some(provider) = providers.get(record.provider as usize) else {
                return Err(corrupt("provider index out of range"));
            };
            if !(1..=5).contains(&record.quality) {
                return Err(corrupt("quality must be between 1 and 5"));
            }
            string_bytes += record.name.len() + record.hostname.len() + provider.len();
            index.push(DiscoveryEntry::from_record(&record, ServiceId(i)));
        }

        let db = Self {
            header,
            compatibility,
            storage,
            providers,
            index,
            offsets,
            string_bytes,
            config,
            endpoints: Cache::builder().max_capacity(config.endpoint_cache).build(),
            metadata: Cache::builder().max_capacity(config.metadata_cache).build(),
            endpoint_hits: AtomicU64::new(0),
            endpoint_misses: AtomicU64::new(0),
            metadata_hits: AtomicU64::new(0),
            metadata_misses: AtomicU64::new(0),
        };
        tracing::info!(
            services = db.index.len(),
            discovery_bytes = db.discovery_bytes(),
            version = %db.header.version_string(),
            "tiered database opened"
        );
        Ok(db)
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    pub fn compatibility(&self) -> Compatibility {
        self.compatibility
    }

    pub fn config(&self) -> &TieredConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// The resident discovery tier, in service id order.
    pub fn discovery_index(&self) -> &[DiscoveryEntry] {
        &self.index
    }

    fn discovery_bytes(&self) -> usize {
        self.index.len() * mem::size_of::<DiscoveryEntry>()
    }

    fn record(&self, id: ServiceId) -> Result<ServiceRecord> {
        let mut pos = *self
            .offsets
            .get(id.index())
            .ok_or_else(|| AtlasError::UnknownService(id.to_string()))?;
        decode_service_at(self.storage.bytes(), &mut pos)
    }

    /// Hostname, port and TLS flag of a service, decoded on first use.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::UnknownService`] for an id past the catalog.
    pub fn endpoint(&self, id: ServiceId) -> Result<Arc<ServiceEndpoint>> {
        if let Some(endpoint) = self.endpoints.get(&id) {
            self.endpoint_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(endpoint);
        }

        self.endpoint_misses.fetch_add(1, Ordering::Relaxed);
        let record = self.record(id)?;
        let endpoint = Arc::new(ServiceEndpoint {
            hostname: record.hostname,
            port: record.port,
            ssl: record.ssl,
        });
        tracing::trace!(service = id.0, hostname = %endpoint.hostname, "endpoint loaded");
        self.endpoints.insert(id, endpoint.clone());
        Ok(endpoint)
    }

    /// Name and provider of a service, decoded on first use.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::UnknownService`] for an id past the catalog.
    pub fn metadata(&self, id: ServiceId) -> Result<Arc<ServiceMetadata>> {
        if let Some(metadata) = self.metadata.get(&id) {
            self.metadata_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(metadata);
        }

        self.metadata_misses.fetch_add(1, Ordering::Relaxed);
        let record = self.record(id)?;
        let metadata = Arc::new(ServiceMetadata {
            provider: self
                .providers
                .get(record.provider as usize)
                .cloned()
                .unwrap_or_default(),
            name: record.name,
            global: record.global,
        });
        tracing::trace!(service = id.0, name = %metadata.name, "metadata loaded");
        self.metadata.insert(id, metadata.clone());
        Ok(metadata)
    }

    fn has_credentials(&self, entry: &DiscoveryEntry, credentials: Option<&CredentialStore>) -> bool {
        credentials.is_some_and(|store| {
            self.providers
                .get(entry.provider as usize)
                .is_some_and(|provider| store.contains(provider))
        })
    }

    /// Best usable service for a position, using the discovery tier alone
    /// until a winner is found.
    ///
    /// Candidates are ordered by payment class, then score, then distance to
    /// their coverage center. Endpoints are loaded in that order and a
    /// placeholder hostname moves on to the next candidate, so only the
    /// endpoints actually inspected are decoded.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidCoordinates`] for an invalid position and
    /// [`AtlasError::NoServices`] if no candidate is usable.
    pub fn find_best(
        &self,
        lat: f64,
        lon: f64,
        criteria: &SelectionCriteria,
        credentials: Option<&CredentialStore>,
    ) -> Result<TieredSelection> {
        validate_coordinates(lat, lon)?;

        let mut candidates: Vec<(&DiscoveryEntry, f64, f64)> = self
            .index
            .iter()
            .filter(|e| e.coverage.contains(lat, lon))
            .filter(|e| criteria.accepts_attributes(e.quality, e.is_paid(), e.auth))
            .filter(|e| !e.is_paid() || self.has_credentials(e, credentials))
            .map(|e| {
                let center_km = e.coverage.center_distance_km(lat, lon);
                let score = criteria.score_attributes(
                    e.quality,
                    e.network,
                    e.auth != AuthMethod::None,
                    center_km,
                );
                (e, center_km, score)
            })
            .collect();

        let priority = self.config.priority;
        candidates.sort_by(|a, b| {
            priority
                .rank_paid(a.0.is_paid())
                .cmp(&priority.rank_paid(b.0.is_paid()))
                .then(b.2.total_cmp(&a.2))
                .then(a.1.total_cmp(&b.1))
        });

        for (entry, center_km, score) in candidates {
            let endpoint = self.endpoint(entry.id)?;
            if is_placeholder_hostname(&endpoint.hostname) {
                tracing::debug!(service = entry.id.0, "skipping placeholder endpoint");
                continue;
            }
            return Ok(TieredSelection {
                service: entry.id,
                endpoint,
                auth: entry.auth,
                quality: entry.quality,
                requires_registration: entry.requires_registration,
                center_km,
                score,
            });
        }

        Err(AtlasError::NoServices { lat, lon })
    }

    /// Decode every record into a full [`Catalog`].
    pub fn load_catalog(&self) -> Result<Catalog> {
        let services = self
            .index
            .iter()
            .map(|e| self.record(e.id))
            .collect::<Result<Vec<_>>>()?;
        Catalog::new(self.providers.clone(), services).map_err(|e| AtlasError::CorruptDatabase {
            path: None,
            reason: e.to_string(),
        })
    }

    /// Drop every cached endpoint and metadata entry. The discovery tier
    /// and the hit/miss counters are kept.
    pub fn trim_caches(&self) {
        let endpoints: Vec<ServiceId> = self.endpoints.iter().map(|(id, _)| *id).collect();
        for id in endpoints {
            self.endpoints.invalidate(&id);
        }
        let metadata: Vec<ServiceId> = self.metadata.iter().map(|(id, _)| *id).collect();
        for id in metadata {
            self.metadata.invalidate(&id);
        }
        tracing::debug!("tiered caches trimmed");
    }

    pub fn stats(&self) -> TieredStats {
        self.endpoints.run_pending_tasks();
        self.metadata.run_pending_tasks();

        let (endpoint_entries, endpoint_bytes) = self
            .endpoints
            .iter()
            .fold((0, 0), |(n, bytes), (_, e)| (n + 1, bytes + e.memory_bytes()));
        let (metadata_entries, metadata_bytes) = self
            .metadata
            .iter()
            .fold((0, 0), |(n, bytes), (_, m)| (n + 1, bytes + m.memory_bytes()));

        let per_service = mem::size_of::<DiscoveryEntry>()
            + mem::size_of::<ServiceEndpoint>()
            + mem::size_of::<ServiceMetadata>();

        TieredStats {
            services: self.index.len(),
            discovery_bytes: self.discovery_bytes(),
            endpoint_entries,
            endpoint_bytes,
            metadata_entries,
            metadata_bytes,
            endpoint_hits: self.endpoint_hits.load(Ordering::Relaxed),
            endpoint_misses: self.endpoint_misses.load(Ordering::Relaxed),
            metadata_hits: self.metadata_hits.load(Ordering::Relaxed),
            metadata_misses: self.metadata_misses.load(Ordering::Relaxed),
            full_bytes: self.index.len() * per_service + self.string_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sample_catalog;
    use crate::database::{encode_catalog, write_catalog, HEADER_LEN};
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    const SYDNEY: (f64, f64) = (-33.87, 151.21);
    const SACRAMENTO: (f64, f64) = (38.58, -121.49);

    fn tiered(config: TieredConfig) -> TieredDatabase {
        let bytes = encode_catalog(&sample_catalog(), 20241130, 2).unwrap();
        TieredDatabase::from_bytes(bytes, config).unwrap()
    }

    fn id(name: &str) -> ServiceId {
        sample_catalog().find(name).unwrap().id
    }

    #[test]
    fn test_discovery_tier_only_on_open() {
        let db = tiered(TieredConfig::default());
        let catalog = sample_catalog();
        assert_eq!(db.len(), catalog.len());
        assert_eq!(db.providers(), catalog.providers());

        for (entry, service) in db.discovery_index().iter().zip(catalog.services()) {
            assert_eq!(entry.id, service.id);
            assert_eq!(entry.coverage, service.coverage);
            assert_eq!(entry.quality, service.quality);
            assert_eq!(entry.is_paid(), service.is_paid());
        }

        let stats = db.stats();
        assert_eq!(stats.endpoint_entries, 0);
        assert_eq!(stats.metadata_entries, 0);
        assert_eq!(stats.endpoint_misses, 0);
        assert_eq!(stats.total_bytes(), stats.discovery_bytes);
        assert!(stats.reduction_percent() > 50.0);
    }

    #[test]
    fn test_endpoint_cached_after_first_load() {
        let db = tiered(TieredConfig::default());
        let auscors = id("auscors");

        let first = db.endpoint(auscors).unwrap();
        assert_eq!(first.hostname, "auscors.ga.gov.au");
        assert_eq!(first.port, 443);
        assert!(first.ssl);

        let second = db.endpoint(auscors).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = db.stats();
        assert_eq!(stats.endpoint_misses, 1);
        assert_eq!(stats.endpoint_hits, 1);
        assert_eq!(stats.endpoint_hit_rate(), 0.5);
        assert_eq!(stats.endpoint_entries, 1);
        assert_eq!(
            stats.endpoint_bytes,
            mem::size_of::<ServiceEndpoint>() + "auscors.ga.gov.au".len()
        );
    }

    #[test]
    fn test_metadata_names_provider() {
        let db = tiered(TieredConfig::default());
        let polaris = db.metadata(id("polaris")).unwrap();
        assert_eq!(polaris.name, "polaris");
        assert_eq!(polaris.provider, "Point One Navigation");
        assert!(polaris.global);

        db.metadata(id("polaris")).unwrap();
        let stats = db.stats();
        assert_eq!((stats.metadata_hits, stats.metadata_misses), (1, 1));
        assert_eq!(stats.endpoint_misses, 0);
    }

    #[test]
    fn test_caches_stay_bounded() {
        let db = tiered(TieredConfig {
            endpoint_cache: 2,
            metadata_cache: 1,
            ..Default::default()
        });
        for entry in db.discovery_index() {
            db.endpoint(entry.id).unwrap();
            db.metadata(entry.id).unwrap();
        }

        let stats = db.stats();
        assert_eq!(stats.endpoint_misses, 7);
        assert!(stats.endpoint_entries <= 2);
        assert!(stats.metadata_entries <= 1);
        assert!(stats.total_bytes() < stats.full_bytes);
    }

    #[test]
    fn test_full_footprint_matches_everything_cached() {
        let db = tiered(TieredConfig {
            endpoint_cache: 16,
            metadata_cache: 16,
            ..Default::default()
        });
        for entry in db.discovery_index() {
            db.endpoint(entry.id).unwrap();
            db.metadata(entry.id).unwrap();
        }

        let stats = db.stats();
        assert_eq!(stats.endpoint_entries, 7);
        assert_eq!(stats.metadata_entries, 7);
        assert_eq!(stats.total_bytes(), stats.full_bytes);
        assert_eq!(stats.reduction_percent(), 0.0);
    }

    #[test]
    fn test_trim_caches_keeps_counters() {
        let db = tiered(TieredConfig::default());
        let rtk2go = id("rtk2go");
        db.endpoint(rtk2go).unwrap();
        db.metadata(rtk2go).unwrap();

        db.trim_caches();
        let stats = db.stats();
        assert_eq!(stats.endpoint_entries, 0);
        assert_eq!(stats.metadata_entries, 0);
        assert_eq!(stats.endpoint_bytes + stats.metadata_bytes, 0);
        assert_eq!(stats.endpoint_misses, 1);

        db.endpoint(rtk2go).unwrap();
        assert_eq!(db.stats().endpoint_misses, 2);
    }

    #[test]
    fn test_unknown_service() {
        let db = tiered(TieredConfig::default());
        let err = db.endpoint(ServiceId(99)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(db.metadata(ServiceId(99)).is_err());
    }

    #[test]
    fn test_find_best_sydney() {
        let db = tiered(TieredConfig::default());
        let best = db
            .find_best(SYDNEY.0, SYDNEY.1, &SelectionCriteria::default(), None)
            .unwrap();
        assert_eq!(best.service, id("auscors"));
        assert_eq!(best.endpoint.hostname, "auscors.ga.gov.au");
        assert!(best.requires_registration);
        assert_eq!(best.quality, 5);

        // Only the winner's endpoint was decoded
        let stats = db.stats();
        assert_eq!(stats.endpoint_misses, 1);
        assert_eq!(stats.metadata_misses, 0);
    }

    #[test]
    fn test_find_best_skips_placeholder_and_missing_credentials() {
        let db = tiered(TieredConfig {
            priority: PaymentPriority::PaidFirst,
            ..Default::default()
        });
        let mut credentials = CredentialStore::default();
        credentials.set("Golden State RTK", "rover", "secret").unwrap();

        // golden-state is paid and credentialed but its host is a
        // placeholder; polaris is paid without credentials
        let best = db
            .find_best(
                SACRAMENTO.0,
                SACRAMENTO.1,
                &SelectionCriteria::default(),
                Some(&credentials),
            )
            .unwrap();
        assert_eq!(best.service, id("rtk2go"));
        assert_eq!(db.stats().endpoint_misses, 2);

        credentials.set("Point One Navigation", "rover", "secret").unwrap();
        let best = db
            .find_best(
                SACRAMENTO.0,
                SACRAMENTO.1,
                &SelectionCriteria::default(),
                Some(&credentials),
            )
            .unwrap();
        assert_eq!(best.service, id("polaris"));
        assert!(best.endpoint.ssl);
    }

    #[test]
    fn test_find_best_respects_criteria() {
        let db = tiered(TieredConfig::default());
        let criteria = SelectionCriteria {
            max_auth: Some(AuthMethod::None),
            ..Default::default()
        };
        let best = db.find_best(SYDNEY.0, SYDNEY.1, &criteria, None).unwrap();
        assert_eq!(best.service, id("rtk2go"));

        let strict = SelectionCriteria {
            min_quality: 5,
            max_auth: Some(AuthMethod::None),
            ..Default::default()
        };
        let err = db.find_best(SYDNEY.0, SYDNEY.1, &strict, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoServices);
        assert!(db
            .find_best(91.0, 0.0, &SelectionCriteria::default(), None)
            .is_err());
    }

    #[test]
    fn test_requires_tiered_feature() {
        let mut bytes = encode_catalog(&sample_catalog(), 20241130, 2).unwrap();
        bytes[13] &= !DatabaseFeatures::TIERED_LOADING.bits();
        assert!(crate::Database::from_bytes(&bytes).is_ok());

        let err = TieredDatabase::from_bytes(bytes, TieredConfig::default()).err();
        assert!(matches!(err, Some(AtlasError::VersionIncompatible { .. })));
    }

    #[test]
    fn test_truncated_record() {
        let bytes = encode_catalog(&sample_catalog(), 20241130, 2).unwrap();
        let cut = bytes[..bytes.len() - 3].to_vec();
        assert!(matches!(
            TieredDatabase::from_bytes(cut, TieredConfig::default()),
            Err(AtlasError::CorruptDatabase { .. })
        ));
        assert!(TieredDatabase::from_bytes(bytes[..HEADER_LEN].to_vec(), TieredConfig::default()).is_err());
    }

    #[test]
    fn test_open_file_and_load_catalog() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("services.db");
        write_catalog(&path, &sample_catalog(), 20250101, 0).unwrap();

        let db = TieredDatabase::open(&path, TieredConfig::default()).unwrap();
        assert_eq!(db.header().build_date, 20250101);
        assert_eq!(db.compatibility(), Compatibility::Compatible);

        let catalog = db.load_catalog().unwrap();
        assert_eq!(catalog.services(), sample_catalog().services());
        assert_eq!(db.endpoint(id("massdot")).unwrap().port, 10000);
    }
}
