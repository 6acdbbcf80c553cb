//! Query criteria, scoring, and result types.
//!
//! The composite score of a candidate is
//!
//! ```text
//! 20·quality + network bonus + auth bonus + preferred bonus − min(distance_km, 100)
//! ```
//!
//! with network bonuses government 15, commercial 10, research 8 and
//! community 5, an auth bonus of 3 for open services, and a bonus of 5 when
//! the service belongs to the caller's preferred network class. Capping the
//! distance penalty keeps a far but covering service from sinking below
//! poorer nearby ones without bound.

use std::cmp::Ordering;

use serde::Serialize;

use crate::catalog::{AuthMethod, NetworkClass, ServiceId, ServiceRecord};
use crate::credentials::Credential;
use crate::eligibility::PaymentPriority;
use crate::mountpoint::Mountpoint;

/// Distance beyond which the score stops dropping.
pub const DISTANCE_CAP_KM: f64 = 100.0;

const QUALITY_WEIGHT: f64 = 20.0;
const OPEN_ACCESS_BONUS: f64 = 3.0;
const PREFERRED_NETWORK_BONUS: f64 = 5.0;

fn network_bonus(network: NetworkClass) -> f64 {
    match network {
        NetworkClass::Government => 15.0,
        NetworkClass::Commercial => 10.0,
        NetworkClass::Research => 8.0,
        NetworkClass::Community => 5.0,
    }
}

/// Caller constraints for one query. The default accepts everything.
///
/// # Example
///
/// ```ignore
/// let criteria = SelectionCriteria {
///     required_formats: vec!["RTCM 3".into()],
///     free_only: true,
///     max_distance_km: Some(50.0),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionCriteria {
    /// Each entry must appear in a mountpoint's format or format details.
    pub required_formats: Vec<String>,
    /// Each entry must appear in a mountpoint's navigation systems.
    pub required_systems: Vec<String>,
    /// Minimum bitrate in bits per second, zero for no limit.
    pub min_bitrate: u32,
    /// Most complex authentication scheme the caller can perform.
    pub max_auth: Option<AuthMethod>,
    /// Reject paid services and fee-charging mountpoints.
    pub free_only: bool,
    /// Maximum distance to the chosen mountpoint.
    pub max_distance_km: Option<f64>,
    /// Minimum service quality, zero for no limit.
    pub min_quality: u8,
    pub preferred_network: Option<NetworkClass>,
}

impl SelectionCriteria {
    /// Service-level constraints: quality, payment, and authentication.
    pub fn accepts_service(&self, service: &ServiceRecord) -> bool {
        self.accepts_attributes(service.quality, service.is_paid(), service.auth)
    }

    /// [`accepts_service`](Self::accepts_service) on bare attributes.
    pub fn accepts_attributes(&self, quality: u8, paid: bool, auth: AuthMethod) -> bool {
        quality >= self.min_quality
            && !(self.free_only && paid)
            && self.max_auth.map_or(true, |max| auth <= max)
    }

    /// Mountpoint-level constraints, ignoring distance.
    pub fn accepts_stream(&self, mountpoint: &Mountpoint) -> bool {
        let nav = mountpoint.nav_system.to_ascii_lowercase();
        self.required_formats.iter().all(|f| mountpoint.offers_format(f))
            && self
                .required_systems
                .iter()
                .all(|s| nav.contains(&s.to_ascii_lowercase()))
            && mountpoint.bitrate >= self.min_bitrate
            && self.max_auth.map_or(true, |max| mountpoint.auth <= max)
            && !(self.free_only && mountpoint.fee_required)
    }

    pub fn within_distance(&self, distance_km: f64) -> bool {
        self.max_distance_km.map_or(true, |max| distance_km <= max)
    }

    /// Composite score of a service at a distance.
    pub fn score(&self, service: &ServiceRecord, distance_km: f64) -> f64 {
        self.score_attributes(
            service.quality,
            service.network,
            service.requires_auth(),
            distance_km,
        )
    }

    pub fn score_attributes(
        &self,
        quality: u8,
        network: NetworkClass,
        requires_auth: bool,
        distance_km: f64,
    ) -> f64 {
        let mut score = QUALITY_WEIGHT * quality as f64 + network_bonus(network);
        if !requires_auth {
            score += OPEN_ACCESS_BONUS;
        }
        if self.preferred_network == Some(network) {
            score += PREFERRED_NETWORK_BONUS;
        }
        score - distance_km.min(DISTANCE_CAP_KM)
    }
}

/// Outcome of picking a mountpoint for one service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamChoice<'a> {
    /// Nearest mountpoint meeting every constraint, with its distance.
    Found(&'a Mountpoint, f64),
    /// Mountpoints qualify except for distance; nearest distance given.
    TooFar(f64),
    /// No mountpoint qualifies.
    None,
}

/// Pick the nearest qualifying mountpoint of a service.
pub fn choose_stream<'a>(
    mountpoints: &'a [Mountpoint],
    lat: f64,
    lon: f64,
    criteria: &SelectionCriteria,
) -> StreamChoice<'a> {
    let nearest = mountpoints
        .iter()
        .filter(|mp| criteria.accepts_stream(mp))
        .map(|mp| (mp, mp.distance_km(lat, lon)))
        .min_by(|a, b| a.1.total_cmp(&b.1));

    match nearest {
        Some((mp, d)) if criteria.within_distance(d) => StreamChoice::Found(mp, d),
        Some((_, d)) => StreamChoice::TooFar(d),
        None => StreamChoice::None,
    }
}

/// One verified candidate with its ranking inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedService {
    pub service: ServiceId,
    pub name: String,
    pub provider: String,
    pub hostname: String,
    pub port: u16,
    pub ssl: bool,
    pub quality: u8,
    pub network: NetworkClass,
    pub paid: bool,
    /// Passes the credential and hostname checks.
    pub usable: bool,
    pub center_km: f64,
    pub edge_km: f64,
    pub score: f64,
}

/// Final ordering: usable first, then payment class, score, distance,
/// and quality.
pub fn compare_ranked(a: &RankedService, b: &RankedService, priority: PaymentPriority) -> Ordering {
    (!a.usable)
        .cmp(&!b.usable)
        .then_with(|| priority.rank_paid(a.paid).cmp(&priority.rank_paid(b.paid)))
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.center_km.total_cmp(&b.center_km))
        .then_with(|| b.quality.cmp(&a.quality))
}

/// Everything needed to open a correction stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestService {
    pub service: ServiceId,
    pub name: String,
    pub server: String,
    pub port: u16,
    pub ssl: bool,
    pub mountpoint: String,
    /// Stored credentials for the service's provider, if any.
    #[serde(skip)]
    pub credential: Option<Credential>,
    /// Distance to the mountpoint in kilometres.
    pub distance_km: f64,
    pub score: f64,
    pub quality: u8,
    pub mountpoint_lat: f64,
    pub mountpoint_lon: f64,
    pub format: String,
    pub nmea_required: bool,
}
