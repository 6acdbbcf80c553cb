//! The immutable service catalog.
//!
//! A [`Catalog`] holds every known correction service and the provider name
//! table they refer to. It is produced once, from YAML definitions or a
//! compiled database, and never mutated afterwards.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};
use crate::geo::BoundingBox;

/// Longest hostname a catalog record may carry.
pub const MAX_HOSTNAME_LEN: usize = 63;

/// Index of a service inside its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServiceId(pub u16);

impl ServiceId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Authentication scheme, ordered by complexity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    None,
    Basic,
    Digest,
}

/// Whether a service charges for access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Free,
    Paid,
}

/// Kind of organisation operating a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Government,
    Commercial,
    #[default]
    Community,
    Research,
}

impl NetworkClass {
    /// Stable wire code used by compiled databases.
    pub fn code(self) -> u8 {
        match self {
            NetworkClass::Government => 1,
            NetworkClass::Commercial => 2,
            NetworkClass::Community => 3,
            NetworkClass::Research => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(NetworkClass::Government),
            2 => Some(NetworkClass::Commercial),
            3 => Some(NetworkClass::Community),
            4 => Some(NetworkClass::Research),
            _ => None,
        }
    }
}

/// One correction-data service endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRecord {
    /// Position in the catalog. Assigned by [`Catalog::new`].
    pub id: ServiceId,
    /// Canonical service identifier, e.g. `"auscors"`.
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub ssl: bool,
    pub auth: AuthMethod,
    pub requires_registration: bool,
    pub access: Access,
    /// Advertised as worldwide.
    pub global: bool,
    pub coverage: BoundingBox,
    /// Index into the catalog's provider table.
    pub provider: u8,
    pub network: NetworkClass,
    /// Operator-assigned rating from 1 (poor) to 5 (excellent).
    pub quality: u8,
}

impl ServiceRecord {
    /// A free, unauthenticated community service with quality 3.
    ///
    /// Use struct update syntax to adjust the remaining fields:
    ///
    /// ```ignore
    /// let auscors = ServiceRecord {
    ///     network: NetworkClass::Government,
    ///     quality: 5,
    ///     ..ServiceRecord::new("auscors", "auscors.ga.gov.au", 443, australia)
    /// };
    /// ```
    pub fn new(name: &str, hostname: &str, port: u16, coverage: BoundingBox) -> Self {
        Self {
            id: ServiceId(0),
            name: name.to_string(),
            hostname: hostname.to_string(),
            port,
            ssl: false,
            auth: AuthMethod::None,
            requires_registration: false,
            access: Access::Free,
            global: false,
            coverage,
            provider: 0,
            network: NetworkClass::Community,
            quality: 3,
        }
    }

    #[inline]
    pub fn is_paid(&self) -> bool {
        self.access == Access::Paid
    }

    #[inline]
    pub fn requires_auth(&self) -> bool {
        self.auth != AuthMethod::None
    }
}

/// The full set of services and providers.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    providers: Vec<String>,
    services: Vec<ServiceRecord>,
}

impl Catalog {
    /// Create a catalog, assigning each service its positional [`ServiceId`].
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::InvalidParameter`] if a service names a provider
    /// index that does not exist, has a quality outside `1..=5`, has an empty
    /// or oversized name or hostname, or reuses another service's name.
    pub fn new(providers: Vec<String>, mut services: Vec<ServiceRecord>) -> Result<Self> {
        if providers.len() > u8::MAX as usize + 1 {
            return Err(AtlasError::InvalidParameter(format!(
                "too many providers: {}",
                providers.len()
            )));
        }
        if services.len() > u16::MAX as usize {
            return Err(AtlasError::InvalidParameter(format!(
                "too many services: {}",
                services.len()
            )));
        }

        let mut names = HashSet::new();
        for (i, service) in services.iter_mut().enumerate() {
            service.id = ServiceId(i as u16);
            let invalid = |what: &str| {
                AtlasError::InvalidParameter(format!("service '{}': {what}", service.name))
            };

            if service.name.is_empty() {
                return Err(AtlasError::InvalidParameter(format!(
                    "service {i} has an empty name"
                )));
            }
            if !names.insert(service.name.clone()) {
                return Err(invalid("duplicate service name"));
            }
            if service.hostname.len() > MAX_HOSTNAME_LEN {
                return Err(invalid("hostname too long"));
            }
            if service.provider as usize >= providers.len() {
                return Err(invalid("provider index out of range"));
            }
            if !(1..=5).contains(&service.quality) {
                return Err(invalid("quality must be between 1 and 5"));
            }
            if service.coverage.lat_min > service.coverage.lat_max {
                return Err(invalid("latitude bounds reversed"));
            }
        }

        Ok(Self {
            providers,
            services,
        })
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// All services in id order.
    pub fn services(&self) -> &[ServiceRecord] {
        &self.services
    }

    /// Provider names in table order.
    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// Look up a service by id.
    pub fn get(&self, id: ServiceId) -> Option<&ServiceRecord> {
        self.services.get(id.index())
    }

    /// Look up a service by id, failing with [`AtlasError::UnknownService`].
    pub fn service(&self, id: ServiceId) -> Result<&ServiceRecord> {
        self.get(id)
            .ok_or_else(|| AtlasError::UnknownService(id.to_string()))
    }

    /// Look up a service by its canonical name.
    pub fn find(&self, name: &str) -> Result<&ServiceRecord> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AtlasError::UnknownService(name.to_string()))
    }

    /// Name of the provider operating a service.
    pub fn provider_name(&self, service: &ServiceRecord) -> &str {
        self.providers
            .get(service.provider as usize)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Index of a provider in the provider table.
    pub fn provider_index(&self, name: &str) -> Result<u8> {
        self.providers
            .iter()
            .position(|p| p == name)
            .map(|i| i as u8)
            .ok_or_else(|| AtlasError::UnknownProvider(name.to_string()))
    }

    /// Services whose coverage intersects a region.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let europe = BoundingBox::from_degrees(35.0, 71.0, -10.0, 40.0)?;
    /// for id in catalog.in_region(&europe) {
    ///     println!("{}", catalog.service(id)?.name);
    /// }
    /// ```
    pub fn in_region(&self, region: &BoundingBox) -> Vec<ServiceId> {
        self.services
            .iter()
            .filter(|s| s.coverage.intersects(region))
            .map(|s| s.id)
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn sample_catalog() -> Catalog {
    let bbox = |lat_min, lat_max, lon_min, lon_max| {
        BoundingBox::from_degrees(lat_min, lat_max, lon_min, lon_max).unwrap()
    };

    let providers = vec![
        "RTK2go".to_string(),
        "Point One Navigation".to_string(),
        "Geoscience Australia".to_string(),
        "IGS".to_string(),
        "MassDOT".to_string(),
        "National Land Survey of Finland".to_string(),
        "Golden State RTK".to_string(),
    ];

    let services = vec![
        ServiceRecord {
            global: true,
            provider: 0,
            ..ServiceRecord::new("rtk2go", "rtk2go.com", 2101, BoundingBox::GLOBAL)
        },
        ServiceRecord {
            global: true,
            ssl: true,
            auth: AuthMethod::Basic,
            requires_registration: true,
            access: Access::Paid,
            provider: 1,
            network: NetworkClass::Commercial,
            quality: 4,
            ..ServiceRecord::new(
                "polaris",
                "polaris.pointonenav.com",
                2101,
                BoundingBox::GLOBAL,
            )
        },
        ServiceRecord {
            ssl: true,
            auth: AuthMethod::Basic,
            requires_registration: true,
            provider: 2,
            network: NetworkClass::Government,
            quality: 5,
            ..ServiceRecord::new(
                "auscors",
                "auscors.ga.gov.au",
                443,
                bbox(-45.0, -10.0, 110.0, 160.0),
            )
        },
        ServiceRecord {
            auth: AuthMethod::Basic,
            requires_registration: true,
            provider: 3,
            network: NetworkClass::Research,
            quality: 5,
            ..ServiceRecord::new("igs-ip", "igs-ip.net", 2101, bbox(35.0, 71.0, -10.0, 40.0))
        },
        ServiceRecord {
            provider: 4,
            network: NetworkClass::Government,
            quality: 4,
            ..ServiceRecord::new(
                "massdot",
                "macorsrtk.massdot.state.ma.us",
                10000,
                bbox(41.42, 42.89, -73.3, -69.9),
            )
        },
        ServiceRecord {
            auth: AuthMethod::Digest,
            provider: 5,
            network: NetworkClass::Government,
            quality: 4,
            ..ServiceRecord::new(
                "finpos",
                "finpos.nls.fi",
                2101,
                bbox(59.9, 70.1, 19.5, 31.6),
            )
        },
        ServiceRecord {
            auth: AuthMethod::Basic,
            access: Access::Paid,
            provider: 6,
            network: NetworkClass::Commercial,
            quality: 5,
            ..ServiceRecord::new(
                "golden-state",
                "contact-sales.example.com",
                2101,
                bbox(32.5, 42.0, -124.4, -114.1),
            )
        },
    ];

    Catalog::new(providers, services).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_assigned_by_position() {
        let catalog = sample_catalog();
        for (i, s) in catalog.services().iter().enumerate() {
            assert_eq!(s.id, ServiceId(i as u16));
        }
        assert_eq!(catalog.find("auscors").unwrap().id, ServiceId(2));
        assert!(matches!(
            catalog.find("nope"),
            Err(AtlasError::UnknownService(_))
        ));
    }

    #[test]
    fn test_provider_lookup() {
        let catalog = sample_catalog();
        let auscors = catalog.find("auscors").unwrap();
        assert_eq!(catalog.provider_name(auscors), "Geoscience Australia");
        assert_eq!(catalog.provider_index("IGS").unwrap(), 3);
        assert!(matches!(
            catalog.provider_index("Nobody"),
            Err(AtlasError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_validation() {
        let good = ServiceRecord::new("a", "a.example.org", 2101, BoundingBox::GLOBAL);

        let bad_quality = ServiceRecord {
            quality: 6,
            ..good.clone()
        };
        assert!(Catalog::new(vec!["p".into()], vec![bad_quality]).is_err());

        let bad_provider = ServiceRecord {
            provider: 1,
            ..good.clone()
        };
        assert!(Catalog::new(vec!["p".into()], vec![bad_provider]).is_err());

        let long_host = ServiceRecord {
            hostname: "h".repeat(MAX_HOSTNAME_LEN + 1),
            ..good.clone()
        };
        assert!(Catalog::new(vec!["p".into()], vec![long_host]).is_err());

        assert!(Catalog::new(vec!["p".into()], vec![good.clone(), good.clone()]).is_err());
        assert!(Catalog::new(vec!["p".into()], vec![good]).is_ok());
    }

    #[test]
    fn test_in_region() {
        let catalog = sample_catalog();
        let new_england = BoundingBox::from_degrees(41.0, 43.0, -74.0, -70.0).unwrap();
        let names: Vec<_> = catalog
            .in_region(&new_england)
            .into_iter()
            .map(|id| catalog.service(id).unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["rtk2go", "polaris", "massdot"]);
    }

    #[test]
    fn test_network_codes() {
        for class in [
            NetworkClass::Government,
            NetworkClass::Commercial,
            NetworkClass::Community,
            NetworkClass::Research,
        ] {
            assert_eq!(NetworkClass::from_code(class.code()), Some(class));
        }
        assert_eq!(NetworkClass::from_code(0), None);
    }
}
