//! YAML service definitions.
//!
//! Definitions are the human-edited source of a catalog:
//!
//! ```yaml
//! services:
//!   - id: auscors
//!     provider: Geoscience Australia
//!     hostname: auscors.ga.gov.au
//!     port: 443
//!     ssl: true
//!     auth: basic
//!     requires_registration: true
//!     network: government
//!     quality: 5
//!     coverage: { lat_min: -45.0, lat_max: -10.0, lon_min: 110.0, lon_max: 160.0 }
//!   - id: rtk2go
//!     provider: RTK2go
//!     hostname: rtk2go.com
//!     global: true
//!     quality: 3
//! ```
//!
//! Providers are numbered in order of first appearance.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::catalog::{Access, AuthMethod, Catalog, NetworkClass, ServiceRecord};
use crate::error::{AtlasError, Result};
use crate::geo::BoundingBox;

/// Default NTRIP caster port.
pub const DEFAULT_PORT: u16 = 2101;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefinitionFile {
    services: Vec<ServiceDefinition>,
}

/// Coverage rectangle in degrees.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoverageDefinition {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

/// One entry of the `services:` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDefinition {
    pub id: String,
    pub provider: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default, alias = "registration_required")]
    pub requires_registration: bool,
    #[serde(default)]
    pub access: Access,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub network: NetworkClass,
    pub quality: u8,
    /// Optional for global services, which default to the whole globe.
    pub coverage: Option<CoverageDefinition>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ServiceDefinition {
    fn coverage_box(&self) -> Result<BoundingBox> {
        match (self.coverage, self.global) {
            (Some(c), _) => BoundingBox::from_degrees(c.lat_min, c.lat_max, c.lon_min, c.lon_max)
                .map_err(|e| {
                    AtlasError::InvalidParameter(format!("service '{}': {e}", self.id))
                }),
            (None, true) => Ok(BoundingBox::GLOBAL),
            (None, false) => Err(AtlasError::InvalidParameter(format!(
                "service '{}' has no coverage and is not global",
                self.id
            ))),
        }
    }
}

/// Build a catalog from parsed definitions.
///
/// # Errors
///
/// Returns [`AtlasError::InvalidParameter`] if a definition is incomplete
/// or fails catalog validation.
pub fn catalog_from_definitions(definitions: Vec<ServiceDefinition>) -> Result<Catalog> {
    let mut providers: Vec<String> = Vec::new();
    let mut services = Vec::with_capacity(definitions.len());

    for def in definitions {
        let provider = match providers.iter().position(|p| *p == def.provider) {
            Some(i) => i,
            None => {
                providers.push(def.provider.clone());
                providers.len() - 1
            }
        };
        if provider > u8::MAX as usize {
            return Err(AtlasError::InvalidParameter(format!(
                "too many providers at service '{}'",
                def.id
            )));
        }

        let coverage = def.coverage_box()?;
        services.push(ServiceRecord {
            ssl: def.ssl,
            auth: def.auth,
            requires_registration: def.requires_registration,
            access: def.access,
            global: def.global,
            provider: provider as u8,
            network: def.network,
            quality: def.quality,
            ..ServiceRecord::new(&def.id, &def.hostname, def.port, coverage)
        });
    }

    tracing::debug!(
        services = services.len(),
        providers = providers.len(),
        "parsed service definitions"
    );
    Catalog::new(providers, services)
}

/// Parse a YAML definition document.
///
/// # Example
///
/// ```ignore
/// use ntrip_atlas::definition::parse_definitions;
///
/// let catalog = parse_definitions(r#"
/// services:
///   - { id: rtk2go, provider: RTK2go, hostname: rtk2go.com, global: true, quality: 3 }
/// "#)?;
/// assert_eq!(catalog.len(), 1);
/// ```
pub fn parse_definitions(yaml: &str) -> Result<Catalog> {
    let file: DefinitionFile = serde_yaml::from_str(yaml)?;
    catalog_from_definitions(file.services)
}

/// Load a YAML definition file from disk.
pub fn load_definitions<P: AsRef<Path>>(path: P) -> Result<Catalog> {
    let text = fs::read_to_string(path)?;
    parse_definitions(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ServiceId;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
services:
  - id: auscors
    provider: Geoscience Australia
    hostname: auscors.ga.gov.au
    port: 443
    ssl: true
    auth: basic
    requires_registration: true
    network: government
    quality: 5
    coverage: { lat_min: -45.0, lat_max: -10.0, lon_min: 110.0, lon_max: 160.0 }
  - id: rtk2go
    provider: RTK2go
    hostname: rtk2go.com
    global: true
    quality: 3
  - id: auscors-ntrip
    provider: Geoscience Australia
    hostname: ntrip.data.gnss.ga.gov.au
    access: free
    network: government
    quality: 4
    coverage: { lat_min: -45.0, lat_max: -10.0, lon_min: 110.0, lon_max: 160.0 }
"#;

    #[test]
    fn test_parse_definitions() {
        let catalog = parse_definitions(SAMPLE).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.providers(),
            &["Geoscience Australia".to_string(), "RTK2go".to_string()]
        );

        let auscors = catalog.service(ServiceId(0)).unwrap();
        assert_eq!(auscors.port, 443);
        assert!(auscors.ssl);
        assert_eq!(auscors.auth, AuthMethod::Basic);
        assert!(auscors.requires_registration);
        assert_eq!(auscors.network, NetworkClass::Government);
        assert_eq!(auscors.coverage.lat_min, -4500);

        let rtk2go = catalog.find("rtk2go").unwrap();
        assert_eq!(rtk2go.port, DEFAULT_PORT);
        assert_eq!(rtk2go.coverage, BoundingBox::GLOBAL);
        assert_eq!(rtk2go.provider, 1);
        assert_eq!(rtk2go.network, NetworkClass::Community);

        // Second service from the same provider reuses the index
        assert_eq!(catalog.find("auscors-ntrip").unwrap().provider, 0);
    }

    #[test]
    fn test_registration_field_names() {
        let yaml = "services:\n  \
                    - { id: a, provider: P, hostname: h, global: true, quality: 3, requires_registration: true }\n  \
                    - { id: b, provider: P, hostname: h, global: true, quality: 3, registration_required: true }\n  \
                    - { id: c, provider: P, hostname: h, global: true, quality: 3 }\n";
        let catalog = parse_definitions(yaml).unwrap();
        let flags: Vec<bool> = catalog
            .services()
            .iter()
            .map(|s| s.requires_registration)
            .collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn test_missing_coverage() {
        let yaml = "services:\n  - { id: x, provider: P, hostname: h, quality: 3 }\n";
        assert!(matches!(
            parse_definitions(yaml),
            Err(AtlasError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_invalid_yaml() {
        let yaml = "services:\n  - { id: x, provider: P, quality: 3, colour: red }\n";
        assert!(matches!(
            parse_definitions(yaml),
            Err(AtlasError::Definition(_))
        ));
    }

    #[test]
    fn test_reversed_latitude() {
        let yaml = "services:\n  - { id: x, provider: P, hostname: h, quality: 3, \
                    coverage: { lat_min: 10.0, lat_max: 5.0, lon_min: 0.0, lon_max: 1.0 } }\n";
        assert!(parse_definitions(yaml).is_err());
    }

    #[test]
    fn test_load_definitions() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let catalog = load_definitions(file.path()).unwrap();
        assert_eq!(catalog.len(), 3);
    }
}
