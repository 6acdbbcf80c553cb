//! The discovery engine.
//!
//! [`DiscoveryEngine`] owns every piece of runtime state: the catalog, its
//! spatial index, the failure table, the geographic blacklist, the
//! credential store and ingested mountpoints. Lookups take `&self`;
//! anything that changes state takes `&mut self`.
//!
//! ```ignore
//! use ntrip_atlas::{EngineBuilder, PaymentPriority};
//!
//! let mut engine = EngineBuilder::new()
//!     .database("/etc/ntrip/services.db")
//!     .payment_priority(PaymentPriority::FreeFirst)
//!     .build()?;
//!
//! engine.ingest_mountpoints(service, mountpoints)?;
//! let best = engine.find_best(-33.87, 151.21)?;
//! println!("{}:{}/{}", best.server, best.port, best.mountpoint);
//! ```

use std::path::{Path, PathBuf};

use crate::backoff::{BackoffConfig, FailureReport, FailureState, FailureStats, FailureTable};
use crate::blacklist::{BlacklistEntry, BlacklistStats, GeoBlacklist, DEFAULT_ENTRIES_PER_SERVICE};
use crate::catalog::{Catalog, ServiceId, ServiceRecord};
use crate::coverage::{coverage_stats, Coverage, CoverageStats, SearchStats, Verifier};
use crate::credentials::{CredentialStore, DEFAULT_CAPACITY};
use crate::database::Database;
use crate::definition::load_definitions;
use crate::eligibility::{filter_eligible, is_usable, order_by_payment_priority, PaymentPriority};
use crate::error::{AtlasError, Result};
use crate::geo::{BoundingBox, GridCell};
use crate::index::{IndexConfig, IndexStats, SpatialIndex};
use crate::mountpoint::{Mountpoint, MountpointTable, DEFAULT_MOUNTPOINTS_PER_SERVICE};
use crate::platform::{Platform, SystemPlatform};
use crate::select::{
    choose_stream, compare_ranked, BestService, RankedService, SelectionCriteria, StreamChoice,
};

/// Load a catalog from a compiled database (`.db`) or YAML definitions.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Catalog> {
    let path = path.as_ref();
    let is_db = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("db"));
    if is_db {
        Ok(Database::open(path)?.into_catalog())
    } else {
        load_definitions(path)
    }
}

/// A service chosen to answer a query, before it is turned into a
/// [`BestService`].
struct Choice<'a> {
    service: &'a ServiceRecord,
    mountpoint: &'a Mountpoint,
    distance_km: f64,
    score: f64,
}

/// Geographic discovery and selection over one catalog.
#[derive(Debug)]
pub struct DiscoveryEngine<P = SystemPlatform> {
    catalog: Catalog,
    index: SpatialIndex,
    failures: FailureTable,
    blacklist: GeoBlacklist,
    credentials: CredentialStore,
    mountpoints: MountpointTable,
    priority: PaymentPriority,
    platform: P,
}

impl DiscoveryEngine {
    /// Create a builder for more configuration options.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Build an engine over a catalog with default settings.
    ///
    /// # Errors
    ///
    /// Returns a capacity error if the catalog does not fit the default
    /// spatial index.
    pub fn new(catalog: Catalog) -> Result<Self> {
        EngineBuilder::new().catalog(catalog).build()
    }
}

impl<P: Platform> DiscoveryEngine<P> {
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn payment_priority(&self) -> PaymentPriority {
        self.priority
    }

    pub fn set_payment_priority(&mut self, priority: PaymentPriority) {
        tracing::debug!(%priority, "payment priority changed");
        self.priority = priority;
    }

    fn verifier(&self) -> Verifier<'_> {
        Verifier::new(&self.catalog, &self.index)
    }

    // --- Spatial lookup and verification ---

    /// Raw spatial-index candidates and the level they came from.
    ///
    /// These are not verified; a coarse tile lists every service that
    /// touches it.
    pub fn find_candidates(&self, lat: f64, lon: f64) -> Result<(u8, &[ServiceId])> {
        self.index.candidates(lat, lon)
    }

    /// Candidates whose coverage contains the point.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidCoordinates`] for coordinates outside
    /// the WGS84 range.
    pub fn candidates(&self, lat: f64, lon: f64) -> Result<Vec<Coverage>> {
        self.verifier().verified(lat, lon)
    }

    /// Candidates containing the point or within `max_km` of their edge.
    pub fn nearby(&self, lat: f64, lon: f64, max_km: f64) -> Result<Vec<Coverage>> {
        self.verifier().nearby(lat, lon, max_km)
    }

    pub fn search_stats(&self, lat: f64, lon: f64) -> Result<SearchStats> {
        self.verifier().search_stats(lat, lon)
    }

    pub fn coverage_stats(&self, lat: f64, lon: f64) -> Result<CoverageStats> {
        coverage_stats(&self.catalog, lat, lon)
    }

    /// Services whose coverage intersects a region.
    pub fn services_in_region(&self, region: &BoundingBox) -> Vec<ServiceId> {
        self.catalog.in_region(region)
    }

    // --- Ranking and selection ---

    fn is_suppressed(&self, service: ServiceId, lat: f64, lon: f64, now_seconds: u64) -> bool {
        self.failures.is_blocked(service, now_seconds)
            || self.blacklist.is_blacklisted(service, lat, lon)
    }

    fn usable(&self, service: &ServiceRecord) -> bool {
        is_usable(
            service,
            self.catalog.provider_name(service),
            Some(&self.credentials),
        )
    }

    /// Every verified, unsuppressed service accepted by `criteria`, best
    /// first.
    ///
    /// Services that fail the credential or hostname check are kept at the
    /// end with `usable` unset.
    ///
    /// # Arguments
    ///
    /// * `lat` - Latitude in decimal degrees
    /// * `lon` - Longitude in decimal degrees
    /// * `criteria` - Service-level constraints; mountpoint constraints are
    ///   ignored here
    pub fn rank(
        &self,
        lat: f64,
        lon: f64,
        criteria: &SelectionCriteria,
    ) -> Result<Vec<RankedService>> {
        let now = self.platform.now_seconds();
        let mut ranked = Vec::new();

        for hit in self.candidates(lat, lon)? {
            if self.is_suppressed(hit.service, lat, lon, now) {
                continue;
            }
            let service = self.catalog.service(hit.service)?;
            if !criteria.accepts_service(service) {
                continue;
            }
            ranked.push(RankedService {
                service: service.id,
                name: service.name.clone(),
                provider: self.catalog.provider_name(service).to_string(),
                hostname: service.hostname.clone(),
                port: service.port,
                ssl: service.ssl,
                quality: service.quality,
                network: service.network,
                paid: service.is_paid(),
                usable: self.usable(service),
                center_km: hit.center_km,
                edge_km: hit.edge_km,
                score: criteria.score(service, hit.center_km),
            });
        }

        ranked.sort_by(|a, b| compare_ranked(a, b, self.priority));
        Ok(ranked)
    }

    /// Order services by usability, payment priority and quality.
    pub fn order_services(&self, services: &mut [ServiceId]) {
        order_by_payment_priority(
            &self.catalog,
            services,
            self.priority,
            Some(&self.credentials),
        );
    }

    /// Only the usable services, in payment priority order.
    pub fn eligible_services(&self, services: &[ServiceId]) -> Vec<ServiceId> {
        filter_eligible(
            &self.catalog,
            services,
            self.priority,
            Some(&self.credentials),
        )
    }

    fn choices(&self, lat: f64, lon: f64, criteria: &SelectionCriteria) -> Result<Vec<Choice<'_>>> {
        let now = self.platform.now_seconds();
        let mut choices = Vec::new();
        let mut nearest_too_far: Option<f64> = None;

        for hit in self.candidates(lat, lon)? {
            if self.is_suppressed(hit.service, lat, lon, now) {
                continue;
            }
            let service = self.catalog.service(hit.service)?;
            if !criteria.accepts_service(service) || !self.usable(service) {
                continue;
            }
            match choose_stream(self.mountpoints.get(service.id), lat, lon, criteria) {
                StreamChoice::Found(mountpoint, distance_km) => choices.push(Choice {
                    service,
                    mountpoint,
                    distance_km,
                    score: criteria.score(service, distance_km),
                }),
                StreamChoice::TooFar(d) => {
                    nearest_too_far = Some(nearest_too_far.map_or(d, |n| n.min(d)));
                }
                StreamChoice::None => {}
            }
        }

        if choices.is_empty() {
            return Err(match nearest_too_far {
                Some(nearest_km) => AtlasError::DistanceLimitExceeded {
                    max_km: criteria.max_distance_km.unwrap_or(f64::INFINITY),
                    nearest_km,
                },
                None => AtlasError::NoServices { lat, lon },
            });
        }

        let priority = self.priority;
        choices.sort_by(|a, b| {
            priority
                .rank(a.service)
                .cmp(&priority.rank(b.service))
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.distance_km.total_cmp(&b.distance_km))
                .then_with(|| b.service.quality.cmp(&a.service.quality))
        });
        Ok(choices)
    }

    fn describe(&self, choice: &Choice<'_>) -> BestService {
        let service = choice.service;
        let mp = choice.mountpoint;
        BestService {
            service: service.id,
            name: service.name.clone(),
            server: service.hostname.clone(),
            port: service.port,
            ssl: service.ssl,
            mountpoint: mp.name.clone(),
            credential: self
                .credentials
                .find(self.catalog.provider_name(service))
                .cloned(),
            distance_km: choice.distance_km,
            score: choice.score,
            quality: service.quality,
            mountpoint_lat: mp.lat,
            mountpoint_lon: mp.lon,
            format: mp.format.clone(),
            nmea_required: mp.nmea_required,
        }
    }

    /// Best service for a position with no extra constraints.
    ///
    /// Only services with ingested mountpoints can be chosen.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::NoServices`] when nothing survives filtering.
    pub fn find_best(&self, lat: f64, lon: f64) -> Result<BestService> {
        self.find_best_filtered(lat, lon, &SelectionCriteria::default())
    }

    /// Best service whose nearest qualifying mountpoint meets `criteria`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::DistanceLimitExceeded`] when mountpoints qualify
    /// except for `criteria.max_distance_km`, and
    /// [`AtlasError::NoServices`] when nothing qualifies at all.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let criteria = SelectionCriteria {
    ///     required_formats: vec!["RTCM 3".into()],
    ///     max_distance_km: Some(50.0),
    ///     ..Default::default()
    /// };
    /// let best = engine.find_best_filtered(42.36, -71.06, &criteria)?;
    /// ```
    pub fn find_best_filtered(
        &self,
        lat: f64,
        lon: f64,
        criteria: &SelectionCriteria,
    ) -> Result<BestService> {
        let choices = self.choices(lat, lon, criteria)?;
        let best = self.describe(&choices[0]);
        tracing::debug!(
            service = %best.name,
            mountpoint = %best.mountpoint,
            distance_km = best.distance_km,
            score = best.score,
            "best service selected"
        );
        Ok(best)
    }

    /// Best service plus the runner-up, if there is one.
    pub fn find_best_with_fallback(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<(BestService, Option<BestService>)> {
        self.find_best_with_fallback_filtered(lat, lon, &SelectionCriteria::default())
    }

    pub fn find_best_with_fallback_filtered(
        &self,
        lat: f64,
        lon: f64,
        criteria: &SelectionCriteria,
    ) -> Result<(BestService, Option<BestService>)> {
        let choices = self.choices(lat, lon, criteria)?;
        let primary = self.describe(&choices[0]);
        let fallback = choices.get(1).map(|c| self.describe(c));
        Ok((primary, fallback))
    }

    // --- Failure tracking ---

    /// Record a failed connection to a service.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::UnknownService`] for an id outside the catalog
    /// and [`AtlasError::Platform`] if the new state cannot be persisted. The
    /// in-memory state is updated either way.
    pub fn record_failure(&mut self, service: ServiceId) -> Result<FailureState> {
        self.catalog.service(service)?;
        if !self.failures.config().enabled {
            return Ok(FailureState::clear(service));
        }
        let state = self
            .failures
            .record_failure(service, self.platform.now_seconds());
        self.platform.store_failure(&state)?;
        Ok(state)
    }

    /// Record a successful connection, clearing any backoff.
    pub fn record_success(&mut self, service: ServiceId) -> Result<()> {
        self.catalog.service(service)?;
        let state = self.failures.record_success(service);
        self.platform.store_failure(&state)
    }

    pub fn is_blocked(&self, service: ServiceId) -> bool {
        self.failures
            .is_blocked(service, self.platform.now_seconds())
    }

    /// Hours until a blocked service may be retried, zero if it is not
    /// blocked.
    pub fn retry_in_hours(&self, service: ServiceId) -> u32 {
        self.failures
            .retry_in_hours(service, self.platform.now_seconds())
    }

    pub fn failure_state(&self, service: ServiceId) -> FailureState {
        self.failures.state(service)
    }

    /// Verbose failure report of a service.
    pub fn failure_report(&self, service: ServiceId) -> Result<FailureReport> {
        let record = self.catalog.service(service)?;
        Ok(self
            .failures
            .state(service)
            .report(&record.name, self.failures.config()))
    }

    pub fn failure_stats(&self) -> FailureStats {
        self.failures.stats(self.platform.now_seconds())
    }

    // --- Geographic blacklist ---

    /// Mark the 1° cell around a position as not covered by a service.
    pub fn blacklist(
        &mut self,
        service: ServiceId,
        lat: f64,
        lon: f64,
        reason: Option<&str>,
    ) -> Result<GridCell> {
        self.catalog.service(service)?;
        let now = self.platform.now_seconds();
        self.blacklist.add(service, lat, lon, reason, now)
    }

    pub fn is_blacklisted(&self, service: ServiceId, lat: f64, lon: f64) -> bool {
        self.blacklist.is_blacklisted(service, lat, lon)
    }

    /// Remove the blacklisted cell around a position.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::NotFound`] if the cell is not blacklisted.
    pub fn remove_blacklist(&mut self, service: ServiceId, lat: f64, lon: f64) -> Result<()> {
        self.blacklist.remove(service, lat, lon)
    }

    pub fn clear_service_blacklist(&mut self, service: ServiceId) {
        self.blacklist.clear_service(service);
    }

    pub fn clear_blacklist(&mut self) {
        self.blacklist.clear();
    }

    pub fn blacklist_entries(&self, service: ServiceId) -> Vec<&BlacklistEntry> {
        self.blacklist.entries(service)
    }

    pub fn blacklist_stats(&self) -> BlacklistStats {
        self.blacklist.stats()
    }

    // --- Credentials ---

    /// Store credentials for a catalog provider and persist them.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::UnknownProvider`] for a provider missing from
    /// the catalog, [`AtlasError::InvalidParameter`] for a username holding
    /// a colon, [`AtlasError::CredentialStoreFull`] when a new provider does
    /// not fit, and [`AtlasError::Platform`] if persisting fails.
    pub fn set_credentials(&mut self, provider: &str, username: &str, password: &str) -> Result<()> {
        self.catalog.provider_index(provider)?;
        if username.contains(':') {
            return Err(AtlasError::InvalidParameter(
                "username cannot contain ':'".into(),
            ));
        }
        let previous = self.credentials.find(provider).cloned();
        self.credentials.set(provider, username, password)?;
        if let Err(e) = self
            .platform
            .store_credential(provider, &format!("{username}:{password}"))
        {
            // the platform refused the value, keep memory in step with it
            match previous {
                Some(old) => self.credentials.set(provider, &old.username, &old.password)?,
                None => {
                    self.credentials.remove(provider);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Forget the credentials of a provider. Returns whether any were held.
    pub fn remove_credentials(&mut self, provider: &str) -> Result<bool> {
        let removed = self.credentials.remove(provider);
        if removed {
            self.platform.store_credential(provider, "")?;
        }
        Ok(removed)
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    // --- Mountpoints ---

    /// Replace the mountpoints known for a service.
    pub fn ingest_mountpoints(
        &mut self,
        service: ServiceId,
        mountpoints: Vec<Mountpoint>,
    ) -> Result<()> {
        self.catalog.service(service)?;
        let count = mountpoints.len();
        self.mountpoints.replace(service, mountpoints)?;
        tracing::debug!(service = service.0, count, "mountpoints ingested");
        Ok(())
    }

    pub fn add_mountpoint(&mut self, service: ServiceId, mountpoint: Mountpoint) -> Result<()> {
        self.catalog.service(service)?;
        self.mountpoints.push(service, mountpoint)
    }

    pub fn mountpoints(&self, service: ServiceId) -> &[Mountpoint] {
        self.mountpoints.get(service)
    }

    pub fn clear_mountpoints(&mut self, service: ServiceId) {
        self.mountpoints.clear_service(service);
    }
}

enum CatalogSource {
    Catalog(Catalog),
    Path(PathBuf),
}

/// Builder for creating [`DiscoveryEngine`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// use ntrip_atlas::{EngineBuilder, PaymentPriority};
///
/// let engine = EngineBuilder::new()
///     .database("services.yaml")
///     .payment_priority(PaymentPriority::PaidFirst)
///     .blacklist_capacity(16)
///     .build()?;
/// ```
pub struct EngineBuilder {
    source: Option<CatalogSource>,
    priority: PaymentPriority,
    backoff: BackoffConfig,
    index_config: IndexConfig,
    blacklist_capacity: usize,
    credential_capacity: usize,
    mountpoint_capacity: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            priority: PaymentPriority::default(),
            backoff: BackoffConfig::default(),
            index_config: IndexConfig::default(),
            blacklist_capacity: DEFAULT_ENTRIES_PER_SERVICE,
            credential_capacity: DEFAULT_CAPACITY,
            mountpoint_capacity: DEFAULT_MOUNTPOINTS_PER_SERVICE,
        }
    }

    /// Create a builder configured from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `NTRIP_ATLAS_DATABASE` | Compiled `.db` file or YAML definitions | Required |
    /// | `NTRIP_ATLAS_PAYMENT_PRIORITY` | `free-first` or `paid-first` | free-first |
    /// | `NTRIP_ATLAS_MAX_TILES` | Spatial index tile capacity | 4096 |
    /// | `NTRIP_ATLAS_TILE_CAPACITY` | Services per tile | 64 |
    /// | `NTRIP_ATLAS_BLACKLIST_CAPACITY` | Blacklisted cells per service | 8 |
    /// | `NTRIP_ATLAS_CREDENTIAL_CAPACITY` | Stored provider credentials | 16 |
    /// | `NTRIP_ATLAS_FAILURE_TRACKING` | `0` or `false` disables backoff | enabled |
    ///
    /// Unparseable values fall back to the default.
    ///
    /// # Errors
    ///
    /// Returns an error if `NTRIP_ATLAS_DATABASE` is not set.
    pub fn from_env() -> Result<Self> {
        let database = std::env::var("NTRIP_ATLAS_DATABASE").map_err(|_| {
            AtlasError::InvalidParameter(
                "NTRIP_ATLAS_DATABASE environment variable not set".into(),
            )
        })?;

        let defaults = Self::new();
        let mut backoff = BackoffConfig::default();
        if let Ok(tracking) = std::env::var("NTRIP_ATLAS_FAILURE_TRACKING") {
            let tracking = tracking.trim();
            backoff.enabled = !(tracking == "0" || tracking.eq_ignore_ascii_case("false"));
        }

        Ok(Self {
            source: Some(CatalogSource::Path(PathBuf::from(database))),
            priority: env_parse("NTRIP_ATLAS_PAYMENT_PRIORITY").unwrap_or(defaults.priority),
            backoff,
            index_config: IndexConfig {
                max_tiles: env_parse("NTRIP_ATLAS_MAX_TILES")
                    .unwrap_or(defaults.index_config.max_tiles),
                max_services_per_tile: env_parse("NTRIP_ATLAS_TILE_CAPACITY")
                    .unwrap_or(defaults.index_config.max_services_per_tile),
            },
            blacklist_capacity: env_parse("NTRIP_ATLAS_BLACKLIST_CAPACITY")
                .unwrap_or(defaults.blacklist_capacity),
            credential_capacity: env_parse("NTRIP_ATLAS_CREDENTIAL_CAPACITY")
                .unwrap_or(defaults.credential_capacity),
            mountpoint_capacity: defaults.mountpoint_capacity,
        })
    }

    /// Load the catalog from a `.db` file or YAML definitions at build time.
    pub fn database<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.source = Some(CatalogSource::Path(path.as_ref().to_path_buf()));
        self
    }

    /// Use an already loaded catalog.
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.source = Some(CatalogSource::Catalog(catalog));
        self
    }

    pub fn payment_priority(mut self, priority: PaymentPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the backoff ladder. Default is 1h, 4h, 12h, 1d, 3d, 1w, 2w, 1 month.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enable or disable failure tracking.
    pub fn failure_tracking(mut self, enabled: bool) -> Self {
        self.backoff.enabled = enabled;
        self
    }

    pub fn index_config(mut self, config: IndexConfig) -> Self {
        self.index_config = config;
        self
    }

    /// Blacklisted cells kept per service. Default is 8.
    pub fn blacklist_capacity(mut self, capacity: usize) -> Self {
        self.blacklist_capacity = capacity;
        self
    }

    /// Providers the credential store can hold. Default is 16.
    pub fn credential_capacity(mut self, capacity: usize) -> Self {
        self.credential_capacity = capacity;
        self
    }

    /// Mountpoints kept per service. Default is 32.
    pub fn mountpoint_capacity(mut self, capacity: usize) -> Self {
        self.mountpoint_capacity = capacity;
        self
    }

    /// Build the [`DiscoveryEngine`] with the system clock and no
    /// persistence.
    pub fn build(self) -> Result<DiscoveryEngine> {
        self.build_with_platform(SystemPlatform)
    }

    /// Build the [`DiscoveryEngine`] on a custom platform.
    ///
    /// Failure states and credentials persisted by the platform are loaded
    /// back. A persisted record that cannot be read is skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidParameter`] if no catalog was configured,
    /// any error from loading the catalog file, and
    /// [`AtlasError::IndexFull`] or [`AtlasError::TileFull`] if the catalog
    /// does not fit the spatial index.
    pub fn build_with_platform<P: Platform>(self, platform: P) -> Result<DiscoveryEngine<P>> {
        let catalog = match self.source {
            Some(CatalogSource::Catalog(catalog)) => catalog,
            Some(CatalogSource::Path(path)) => load_catalog(&path)?,
            None => {
                return Err(AtlasError::InvalidParameter(
                    "no catalog or database configured".into(),
                ))
            }
        };

        let index = SpatialIndex::build(&catalog, self.index_config)?;
        let mut engine = DiscoveryEngine {
            catalog,
            index,
            failures: FailureTable::new(self.backoff),
            blacklist: GeoBlacklist::new(self.blacklist_capacity),
            credentials: CredentialStore::new(self.credential_capacity),
            mountpoints: MountpointTable::new(self.mountpoint_capacity),
            priority: self.priority,
            platform,
        };
        engine.restore_persisted();

        tracing::info!(
            services = engine.catalog.len(),
            providers = engine.catalog.providers().len(),
            tiles = engine.index.tiles().len(),
            priority = %engine.priority,
            "discovery engine ready"
        );
        Ok(engine)
    }
}

impl<P: Platform> DiscoveryEngine<P> {
    fn restore_persisted(&mut self) {
        if self.failures.config().enabled {
            match self.platform.load_failures() {
                Ok(states) => {
                    for state in states {
                        if self.catalog.get(state.service).is_some() {
                            self.failures.restore(state);
                        } else {
                            tracing::debug!(service = state.service.0, "dropping failure state of unknown service");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "ignoring persisted failure states"),
            }
        }

        for provider in self.catalog.providers() {
            let value = match self.platform.load_credential(provider) {
                Ok(Some(value)) if !value.is_empty() => value,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(%provider, error = %e, "ignoring persisted credentials");
                    continue;
                }
            };
            let Some((username, password)) = value.split_once(':') else {
                tracing::warn!(%provider, "malformed persisted credentials");
                continue;
            };
            if let Err(e) = self.credentials.set(provider, username, password) {
                tracing::warn!(%provider, error = %e, "cannot restore credentials");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::hours_since_epoch;
    use crate::catalog::sample_catalog;
    use crate::error::ErrorKind;
    use crate::platform::MemoryPlatform;

    const T0: u64 = 1_700_000_000;
    const SYDNEY: (f64, f64) = (-33.87, 151.21);

    fn engine() -> DiscoveryEngine<MemoryPlatform> {
        EngineBuilder::new()
            .catalog(sample_catalog())
            .build_with_platform(MemoryPlatform::new(T0))
            .unwrap()
    }

    fn id(engine: &DiscoveryEngine<MemoryPlatform>, name: &str) -> ServiceId {
        engine.catalog().find(name).unwrap().id
    }

    fn with_sydney_streams(engine: &mut DiscoveryEngine<MemoryPlatform>) {
        let auscors = id(engine, "auscors");
        let rtk2go = id(engine, "rtk2go");
        engine
            .ingest_mountpoints(
                auscors,
                vec![Mountpoint::new("SYDN00AUS0", -33.87, 151.21, "RTCM 3.2")],
            )
            .unwrap();
        engine
            .ingest_mountpoints(rtk2go, vec![Mountpoint::new("SYD_BASE", -33.8, 151.0, "RTCM 3.2")])
            .unwrap();
    }

    #[test]
    fn test_build_requires_catalog() {
        let err = EngineBuilder::new().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_rank_sydney() {
        let engine = engine();
        let ranked = engine
            .rank(SYDNEY.0, SYDNEY.1, &SelectionCriteria::default())
            .unwrap();
        let names: Vec<_> = ranked.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["auscors", "rtk2go", "polaris"]);
        assert!(!ranked[2].usable);
        assert_eq!(ranked[0].edge_km, 0.0);
    }

    #[test]
    fn test_rank_excludes_blocked_and_blacklisted() {
        let mut engine = engine();
        let auscors = id(&engine, "auscors");
        let rtk2go = id(&engine, "rtk2go");

        engine.record_failure(auscors).unwrap();
        engine.blacklist(rtk2go, SYDNEY.0, SYDNEY.1, None).unwrap();

        let ranked = engine
            .rank(SYDNEY.0, SYDNEY.1, &SelectionCriteria::default())
            .unwrap();
        let names: Vec<_> = ranked.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["polaris"]);

        // A different cell is not affected by the blacklist
        assert!(!engine.is_blacklisted(rtk2go, -33.87, 150.5));
    }

    #[test]
    fn test_backoff_escalation() {
        let mut engine = engine();
        let igs = id(&engine, "igs-ip");

        let hours: Vec<u32> = (0..3)
            .map(|_| {
                engine.record_failure(igs).unwrap();
                engine.retry_in_hours(igs)
            })
            .collect();
        assert_eq!(hours, vec![1, 4, 12]);
        assert!(engine.is_blocked(igs));
        assert_eq!(engine.platform().stored_failures(), 1);

        engine.record_success(igs).unwrap();
        assert!(!engine.is_blocked(igs));
        assert_eq!(engine.retry_in_hours(igs), 0);
        assert_eq!(engine.platform().stored_failures(), 0);
    }

    #[test]
    fn test_block_expires() {
        let mut engine = engine();
        let igs = id(&engine, "igs-ip");
        engine.record_failure(igs).unwrap();
        assert!(engine.is_blocked(igs));

        engine.platform_mut().advance(2 * 3_600);
        assert!(!engine.is_blocked(igs));
    }

    #[test]
    fn test_failure_tracking_disabled() {
        let mut engine = EngineBuilder::new()
            .catalog(sample_catalog())
            .failure_tracking(false)
            .build_with_platform(MemoryPlatform::new(T0))
            .unwrap();
        let igs = id(&engine, "igs-ip");
        engine.record_failure(igs).unwrap();
        assert!(!engine.is_blocked(igs));
        assert_eq!(engine.failure_stats().services_with_failures, 0);
    }

    #[test]
    fn test_failure_state_restored() {
        let mut engine = engine();
        let igs = id(&engine, "igs-ip");
        engine.record_failure(igs).unwrap();
        engine.record_failure(igs).unwrap();

        let restored = EngineBuilder::new()
            .catalog(sample_catalog())
            .build_with_platform(engine.platform().clone())
            .unwrap();
        assert!(restored.is_blocked(igs));
        assert_eq!(restored.failure_state(igs).failure_count, 2);

        let report = restored.failure_report(igs).unwrap();
        assert_eq!(report.service, "igs-ip");
        assert_eq!(report.backoff_seconds, 14_400);
    }

    #[test]
    fn test_unknown_service() {
        let mut engine = engine();
        let err = engine.record_failure(ServiceId(99)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(engine
            .ingest_mountpoints(ServiceId(99), Vec::new())
            .is_err());
    }

    #[test]
    fn test_credentials_make_paid_usable() {
        let mut engine = engine();
        engine
            .set_credentials("Point One Navigation", "rover", "secret")
            .unwrap();

        let ranked = engine
            .rank(SYDNEY.0, SYDNEY.1, &SelectionCriteria::default())
            .unwrap();
        assert!(ranked.iter().all(|r| r.usable));

        // Persisted and restored on the next start
        let restored = EngineBuilder::new()
            .catalog(sample_catalog())
            .build_with_platform(engine.platform().clone())
            .unwrap();
        let cred = restored.credentials().get("Point One Navigation").unwrap();
        assert_eq!(cred.username, "rover");
        assert_eq!(cred.password, "secret");

        assert!(engine.set_credentials("Nobody", "u", "p").is_err());
        assert!(engine.set_credentials("IGS", "a:b", "p").is_err());
        assert!(engine.remove_credentials("Point One Navigation").unwrap());
        assert!(!engine.remove_credentials("Point One Navigation").unwrap());
    }

    #[test]
    fn test_rejected_credentials_leave_store_unchanged() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = EngineBuilder::new()
            .catalog(sample_catalog())
            .build_with_platform(crate::platform::FilePlatform::new(dir.path()).unwrap())
            .unwrap();

        let err = engine
            .set_credentials("Point One Navigation", "rover", "line\nbreak")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(!engine.credentials().contains("Point One Navigation"));

        engine
            .set_credentials("Point One Navigation", "rover", "secret")
            .unwrap();
        assert!(engine
            .set_credentials("Point One Navigation", "other", "bad\nvalue")
            .is_err());
        let cred = engine.credentials().get("Point One Navigation").unwrap();
        assert_eq!(cred.username, "rover");
        assert_eq!(cred.password, "secret");
    }

    /// Memory platform that counts how often persisted failures are read.
    struct CountingPlatform {
        inner: MemoryPlatform,
        batch_loads: std::cell::Cell<usize>,
        single_loads: std::cell::Cell<usize>,
    }

    impl Platform for CountingPlatform {
        fn now_seconds(&self) -> u64 {
            self.inner.now_seconds()
        }

        fn load_failures(&self) -> Result<Vec<FailureState>> {
            self.batch_loads.set(self.batch_loads.get() + 1);
            self.inner.load_failures()
        }

        fn load_failure(&self, service: ServiceId) -> Result<Option<FailureState>> {
            self.single_loads.set(self.single_loads.get() + 1);
            self.inner.load_failure(service)
        }
    }

    #[test]
    fn test_persisted_failures_loaded_once() {
        let mut inner = MemoryPlatform::new(T0);
        let catalog = sample_catalog();
        let igs = catalog.find("igs-ip").unwrap().id;
        let mut state = FailureState::clear(igs);
        state.record_failure(hours_since_epoch(T0), &BackoffConfig::default());
        inner.store_failure(&state).unwrap();
        // a record left behind by a larger catalog
        let mut stale = FailureState::clear(ServiceId(500));
        stale.record_failure(hours_since_epoch(T0), &BackoffConfig::default());
        inner.store_failure(&stale).unwrap();

        let engine = EngineBuilder::new()
            .catalog(catalog)
            .build_with_platform(CountingPlatform {
                inner,
                batch_loads: Default::default(),
                single_loads: Default::default(),
            })
            .unwrap();

        assert_eq!(engine.platform().batch_loads.get(), 1);
        assert_eq!(engine.platform().single_loads.get(), 0);
        assert!(engine.is_blocked(igs));
        assert_eq!(engine.failure_stats().services_with_failures, 1);
    }

    #[test]
    fn test_find_best_with_fallback() {
        let mut engine = engine();
        with_sydney_streams(&mut engine);

        let (best, fallback) = engine.find_best_with_fallback(SYDNEY.0, SYDNEY.1).unwrap();
        assert_eq!(best.name, "auscors");
        assert_eq!(best.server, "auscors.ga.gov.au");
        assert_eq!(best.port, 443);
        assert_eq!(best.mountpoint, "SYDN00AUS0");
        assert!(best.distance_km < 0.01);
        assert!(best.credential.is_none());

        let fallback = fallback.unwrap();
        assert_eq!(fallback.name, "rtk2go");
        assert!(fallback.score < best.score);
    }

    #[test]
    fn test_find_best_carries_credentials() {
        let mut engine = engine();
        with_sydney_streams(&mut engine);
        engine.set_credentials("Geoscience Australia", "ga", "pw").unwrap();

        let best = engine.find_best(SYDNEY.0, SYDNEY.1).unwrap();
        assert_eq!(best.credential.unwrap().username, "ga");
    }

    #[test]
    fn test_find_best_without_mountpoints() {
        let engine = engine();
        let err = engine.find_best(SYDNEY.0, SYDNEY.1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoServices);
    }

    #[test]
    fn test_distance_limit_exceeded() {
        let mut engine = engine();
        with_sydney_streams(&mut engine);

        let criteria = SelectionCriteria {
            max_distance_km: Some(10.0),
            ..Default::default()
        };
        match engine.find_best_filtered(-33.0, 151.0, &criteria) {
            Err(AtlasError::DistanceLimitExceeded { max_km, nearest_km }) => {
                assert_eq!(max_km, 10.0);
                // SYD_BASE is 0.8° of latitude away
                assert!((nearest_km - 89.0).abs() < 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_find_best_skips_blocked() {
        let mut engine = engine();
        with_sydney_streams(&mut engine);
        let auscors = id(&engine, "auscors");
        engine.record_failure(auscors).unwrap();

        let (best, fallback) = engine.find_best_with_fallback(SYDNEY.0, SYDNEY.1).unwrap();
        assert_eq!(best.name, "rtk2go");
        assert!(fallback.is_none());
    }

    #[test]
    fn test_eligible_services() {
        let mut engine = engine();
        engine.set_payment_priority(PaymentPriority::PaidFirst);
        let all: Vec<ServiceId> = engine.catalog().services().iter().map(|s| s.id).collect();
        let eligible = engine.eligible_services(&all);
        assert_eq!(eligible.len(), 5);
        assert!(eligible
            .iter()
            .all(|id| !engine.catalog().service(*id).unwrap().is_paid()));

        let mut ordered = all.clone();
        engine.order_services(&mut ordered);
        assert_eq!(ordered.len(), all.len());
    }

    #[test]
    fn test_blacklist_management() {
        let mut engine = engine();
        let igs = id(&engine, "igs-ip");
        let cell = engine.blacklist(igs, 48.5, -0.5, Some("No coverage")).unwrap();
        assert_eq!((cell.lat, cell.lon), (48, -1));
        assert_eq!(engine.blacklist_stats().total_regions, 1);
        assert_eq!(engine.blacklist_entries(igs).len(), 1);

        engine.remove_blacklist(igs, 48.1, -0.9).unwrap();
        assert_eq!(
            engine.remove_blacklist(igs, 48.1, -0.9).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        engine.blacklist(igs, 48.5, -0.5, None).unwrap();
        engine.clear_service_blacklist(igs);
        assert_eq!(engine.blacklist_stats().total_regions, 0);
    }

    #[test]
    fn test_from_env() {
        // Save original values
        let names = [
            "NTRIP_ATLAS_DATABASE",
            "NTRIP_ATLAS_PAYMENT_PRIORITY",
            "NTRIP_ATLAS_BLACKLIST_CAPACITY",
            "NTRIP_ATLAS_FAILURE_TRACKING",
        ];
        let originals: Vec<_> = names.iter().map(|n| std::env::var(n).ok()).collect();

        std::env::remove_var("NTRIP_ATLAS_DATABASE");
        assert!(EngineBuilder::from_env().is_err());

        std::env::set_var("NTRIP_ATLAS_DATABASE", "/tmp/services.db");
        std::env::set_var("NTRIP_ATLAS_PAYMENT_PRIORITY", "paid-first");
        std::env::set_var("NTRIP_ATLAS_BLACKLIST_CAPACITY", "not-a-number");
        std::env::set_var("NTRIP_ATLAS_FAILURE_TRACKING", "false");

        let builder = EngineBuilder::from_env().unwrap();
        assert!(matches!(
            builder.source,
            Some(CatalogSource::Path(ref p)) if p == Path::new("/tmp/services.db")
        ));
        assert_eq!(builder.priority, PaymentPriority::PaidFirst);
        assert_eq!(builder.blacklist_capacity, DEFAULT_ENTRIES_PER_SERVICE);
        assert!(!builder.backoff.enabled);

        // Restore original values
        for (name, original) in names.iter().zip(originals) {
            match original {
                Some(v) => std::env::set_var(name, v),
                None => std::env::remove_var(name),
            }
        }
    }
}
