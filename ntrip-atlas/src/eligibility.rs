//! Credential and payment policy.
//!
//! A service is *usable* when its hostname is real and, for paid services,
//! the caller holds credentials for its provider. Usable services are then
//! ordered by the engine's payment priority and quality.

use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::catalog::{Catalog, ServiceId, ServiceRecord};
use crate::credentials::CredentialStore;
use crate::error::AtlasError;

/// Hostname fragments left behind by unfinished catalog entries.
const PLACEHOLDER_DOMAINS: [&str; 4] = [
    "example.com",
    "register.example",
    "contact-sales.example",
    "academic.example",
];

/// Whether a hostname can never be connected to.
pub fn is_placeholder_hostname(hostname: &str) -> bool {
    let host = hostname.trim();
    host.is_empty()
        || host.eq_ignore_ascii_case("localhost")
        || host == "127.0.0.1"
        || host == "::1"
        || {
            let lower = host.to_ascii_lowercase();
            PLACEHOLDER_DOMAINS.iter().any(|d| lower.contains(d))
        }
}

/// Whether a service can be connected to with the credentials at hand.
pub fn is_usable(
    service: &ServiceRecord,
    provider: &str,
    credentials: Option<&CredentialStore>,
) -> bool {
    if is_placeholder_hostname(&service.hostname) {
        return false;
    }
    if service.is_paid() {
        return credentials.is_some_and(|store| store.contains(provider));
    }
    true
}

/// Which payment class is offered first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentPriority {
    #[default]
    FreeFirst,
    PaidFirst,
}

impl PaymentPriority {
    /// Sort rank of a service's payment class, lower first.
    pub fn rank(self, service: &ServiceRecord) -> u8 {
        self.rank_paid(service.is_paid())
    }

    pub fn rank_paid(self, paid: bool) -> u8 {
        match (self, paid) {
            (PaymentPriority::FreeFirst, false) | (PaymentPriority::PaidFirst, true) => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for PaymentPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentPriority::FreeFirst => "free-first",
            PaymentPriority::PaidFirst => "paid-first",
        })
    }
}

impl FromStr for PaymentPriority {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "free-first" | "free" => Ok(PaymentPriority::FreeFirst),
            "paid-first" | "paid" => Ok(PaymentPriority::PaidFirst),
            other => Err(AtlasError::InvalidParameter(format!(
                "unknown payment priority '{other}'"
            ))),
        }
    }
}

/// Order services: usable first, then by payment class, then by quality.
///
/// The sort is stable, so services that tie keep their input order.
/// Unknown ids sort last.
pub fn order_by_payment_priority(
    catalog: &Catalog,
    services: &mut [ServiceId],
    priority: PaymentPriority,
    credentials: Option<&CredentialStore>,
) {
    services.sort_by_key(|id| match catalog.get(*id) {
        Some(s) => {
            let usable = is_usable(s, catalog.provider_name(s), credentials);
            (!usable, priority.rank(s), Reverse(s.quality))
        }
        None => (true, u8::MAX, Reverse(0)),
    });
}

/// Only the usable services, ordered as [`order_by_payment_priority`].
///
/// # Example
///
/// ```ignore
/// let all: Vec<ServiceId> = catalog.services().iter().map(|s| s.id).collect();
/// let usable = filter_eligible(&catalog, &all, PaymentPriority::PaidFirst, Some(&store));
/// ```
pub fn filter_eligible(
    catalog: &Catalog,
    services: &[ServiceId],
    priority: PaymentPriority,
    credentials: Option<&CredentialStore>,
) -> Vec<ServiceId> {
    let mut kept: Vec<ServiceId> = services
        .iter()
        .copied()
        .filter(|id| {
            catalog
                .get(*id)
                .is_some_and(|s| is_usable(s, catalog.provider_name(s), credentials))
        })
        .collect();
    order_by_payment_priority(catalog, &mut kept, priority, credentials);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sample_catalog;

    fn all(catalog: &Catalog) -> Vec<ServiceId> {
        catalog.services().iter().map(|s| s.id).collect()
    }

    fn names(catalog: &Catalog, ids: &[ServiceId]) -> Vec<String> {
        ids.iter()
            .map(|id| catalog.service(*id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_placeholder_hostnames() {
        assert!(is_placeholder_hostname(""));
        assert!(is_placeholder_hostname("localhost"));
        assert!(is_placeholder_hostname("127.0.0.1"));
        assert!(is_placeholder_hostname("contact-sales.example.com"));
        assert!(is_placeholder_hostname("ntrip.register.example.org"));
        assert!(!is_placeholder_hostname("rtk2go.com"));
        assert!(!is_placeholder_hostname("auscors.ga.gov.au"));
    }

    #[test]
    fn test_usable() {
        let catalog = sample_catalog();
        let polaris = catalog.find("polaris").unwrap();
        let provider = catalog.provider_name(polaris);

        assert!(!is_usable(polaris, provider, None));
        let mut store = CredentialStore::default();
        assert!(!is_usable(polaris, provider, Some(&store)));
        store.set(provider, "u", "p").unwrap();
        assert!(is_usable(polaris, provider, Some(&store)));

        // Free services need no credentials
        let rtk2go = catalog.find("rtk2go").unwrap();
        assert!(is_usable(rtk2go, catalog.provider_name(rtk2go), None));

        // Placeholder hosts stay unusable even with credentials
        let golden = catalog.find("golden-state").unwrap();
        store.set(catalog.provider_name(golden), "u", "p").unwrap();
        assert!(!is_usable(golden, catalog.provider_name(golden), Some(&store)));
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(
            "free-first".parse::<PaymentPriority>().unwrap(),
            PaymentPriority::FreeFirst
        );
        assert_eq!(
            "PAID_FIRST".parse::<PaymentPriority>().unwrap(),
            PaymentPriority::PaidFirst
        );
        assert!("cheapest".parse::<PaymentPriority>().is_err());
        assert_eq!(PaymentPriority::PaidFirst.to_string(), "paid-first");
    }

    #[test]
    fn test_paid_first_without_credentials() {
        let catalog = sample_catalog();
        let store = CredentialStore::default();
        let eligible =
            filter_eligible(&catalog, &all(&catalog), PaymentPriority::PaidFirst, Some(&store));
        assert!(eligible.iter().all(|id| !catalog.service(*id).unwrap().is_paid()));
        assert_eq!(
            names(&catalog, &eligible),
            vec!["auscors", "igs-ip", "massdot", "finpos", "rtk2go"]
        );
    }

    #[test]
    fn test_paid_first_with_credentials() {
        let catalog = sample_catalog();
        let mut store = CredentialStore::default();
        store.set("Point One Navigation", "u", "p").unwrap();
        let eligible =
            filter_eligible(&catalog, &all(&catalog), PaymentPriority::PaidFirst, Some(&store));
        assert_eq!(names(&catalog, &eligible)[0], "polaris");

        let eligible =
            filter_eligible(&catalog, &all(&catalog), PaymentPriority::FreeFirst, Some(&store));
        assert_eq!(names(&catalog, &eligible).last().unwrap(), "polaris");
    }

    #[test]
    fn test_unusable_ranked_last() {
        let catalog = sample_catalog();
        let mut ids = all(&catalog);
        order_by_payment_priority(&catalog, &mut ids, PaymentPriority::PaidFirst, None);
        let ordered = names(&catalog, &ids);
        // Every service is returned, unusable ones at the end
        assert_eq!(ordered.len(), catalog.len());
        assert_eq!(&ordered[5..], &["golden-state", "polaris"]);
    }
}
