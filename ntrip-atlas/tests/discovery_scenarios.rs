//! End-to-end discovery scenarios over a small YAML catalog.

use ntrip_atlas::{
    database, definition, AtlasError, DiscoveryEngine, EngineBuilder, ErrorKind, FilePlatform,
    MemoryPlatform, Mountpoint, PaymentPriority, Platform, SelectionCriteria,
};
use std::fs;
use tempfile::TempDir;

const CATALOG: &str = r#"
services:
  - id: rtk2go
    provider: RTK2go
    hostname: rtk2go.com
    global: true
    quality: 3
  - id: auscors
    provider: Geoscience Australia
    hostname: auscors.ga.gov.au
    port: 443
    ssl: true
    auth: basic
    network: government
    quality: 5
    coverage: { lat_min: -45.0, lat_max: -10.0, lon_min: 110.0, lon_max: 160.0 }
  - id: eft-cors
    provider: EFT
    hostname: eft-cors.ru
    auth: basic
    access: paid
    network: commercial
    quality: 4
    coverage: { lat_min: 40.0, lat_max: 70.0, lon_min: 20.0, lon_max: 60.0 }
  - id: premium-eu
    provider: Premium
    hostname: ntrip.contact-sales.example
    auth: basic
    access: paid
    network: commercial
    quality: 4
    coverage: { lat_min: 35.0, lat_max: 72.0, lon_min: -25.0, lon_max: 45.0 }
"#;

const T0: u64 = 1_700_000_000;
const SYDNEY: (f64, f64) = (-33.87, 151.21);
const MOSCOW: (f64, f64) = (55.75, 37.62);

fn engine_with(priority: PaymentPriority) -> DiscoveryEngine<MemoryPlatform> {
    let catalog = definition::parse_definitions(CATALOG).unwrap();
    EngineBuilder::new()
        .catalog(catalog)
        .payment_priority(priority)
        .build_with_platform(MemoryPlatform::new(T0))
        .unwrap()
}

fn names(engine: &DiscoveryEngine<MemoryPlatform>, (lat, lon): (f64, f64)) -> Vec<String> {
    engine
        .rank(lat, lon, &SelectionCriteria::default())
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect()
}

/// Mountpoints near Sydney and Moscow for the free and paid services.
fn add_streams<P: Platform>(engine: &mut DiscoveryEngine<P>) {
    let rtk2go = engine.catalog().find("rtk2go").unwrap().id;
    engine
        .ingest_mountpoints(
            rtk2go,
            vec![
                Mountpoint::new("SYD_BASE", -33.8, 151.0, "RTCM 3.0"),
                Mountpoint::new("MSK_RTK", 55.7, 37.6, "RTCM 3.0"),
            ],
        )
        .unwrap();

    let auscors = engine.catalog().find("auscors").unwrap().id;
    engine
        .ingest_mountpoints(
            auscors,
            vec![Mountpoint::new("SYDN00AUS0", -33.87, 151.21, "RTCM 3.2")],
        )
        .unwrap();

    let eft = engine.catalog().find("eft-cors").unwrap().id;
    engine
        .add_mountpoint(eft, Mountpoint::new("MOSC", 55.75, 37.62, "RTCM 3.2"))
        .unwrap();
}

#[test]
fn test_sydney_prefers_government_network() {
    let engine = engine_with(PaymentPriority::FreeFirst);
    assert_eq!(names(&engine, SYDNEY), vec!["auscors", "rtk2go"]);
}

#[test]
fn test_moscow_paid_services_unusable_without_credentials() {
    let engine = engine_with(PaymentPriority::FreeFirst);
    let ranked = engine
        .rank(MOSCOW.0, MOSCOW.1, &SelectionCriteria::default())
        .unwrap();

    let order: Vec<(&str, bool)> = ranked.iter().map(|s| (s.name.as_str(), s.usable)).collect();
    assert_eq!(
        order,
        vec![("rtk2go", true), ("eft-cors", false), ("premium-eu", false)]
    );
}

#[test]
fn test_placeholder_host_stays_unusable_with_credentials() {
    let mut engine = engine_with(PaymentPriority::PaidFirst);
    engine.set_credentials("EFT", "surveyor", "secret").unwrap();
    engine.set_credentials("Premium", "surveyor", "secret").unwrap();

    let ranked = engine
        .rank(MOSCOW.0, MOSCOW.1, &SelectionCriteria::default())
        .unwrap();
    let usable: Vec<&str> = ranked
        .iter()
        .filter(|s| s.usable)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(usable, vec!["eft-cors", "rtk2go"]);
    assert_eq!(ranked.last().unwrap().name, "premium-eu");
}

#[test]
fn test_payment_priority_decides_between_free_and_paid() {
    let mut free_first = engine_with(PaymentPriority::FreeFirst);
    free_first.set_credentials("EFT", "surveyor", "secret").unwrap();
    add_streams(&mut free_first);
    let best = free_first.find_best(MOSCOW.0, MOSCOW.1).unwrap();
    assert_eq!(best.name, "rtk2go");
    assert_eq!(best.mountpoint, "MSK_RTK");
    assert!(best.credential.is_none());

    let mut paid_first = engine_with(PaymentPriority::PaidFirst);
    paid_first.set_credentials("EFT", "surveyor", "secret").unwrap();
    add_streams(&mut paid_first);
    let best = paid_first.find_best(MOSCOW.0, MOSCOW.1).unwrap();
    assert_eq!(best.name, "eft-cors");
    assert_eq!(best.server, "eft-cors.ru");
    assert_eq!(best.port, 2101);
    assert_eq!(best.credential.unwrap().username, "surveyor");
}

#[test]
fn test_failed_service_backs_off_then_recovers() {
    let mut engine = engine_with(PaymentPriority::FreeFirst);
    engine.set_credentials("EFT", "surveyor", "secret").unwrap();
    add_streams(&mut engine);
    let rtk2go = engine.catalog().find("rtk2go").unwrap().id;

    let state = engine.record_failure(rtk2go).unwrap();
    assert_eq!(state.backoff_level, 1);
    assert!(engine.is_blocked(rtk2go));
    assert_eq!(engine.platform().stored_failures(), 1);
    assert_eq!(
        engine.find_best(MOSCOW.0, MOSCOW.1).unwrap().name,
        "eft-cors"
    );

    engine.platform_mut().advance(2 * 3600 + 1);
    assert!(!engine.is_blocked(rtk2go));
    assert_eq!(engine.find_best(MOSCOW.0, MOSCOW.1).unwrap().name, "rtk2go");

    engine.record_success(rtk2go).unwrap();
    assert!(engine.failure_state(rtk2go).is_clear());
    assert_eq!(engine.platform().stored_failures(), 0);
}

#[test]
fn test_fallback_comes_from_another_service() {
    let mut engine = engine_with(PaymentPriority::FreeFirst);
    add_streams(&mut engine);

    let (primary, fallback) = engine.find_best_with_fallback(SYDNEY.0, SYDNEY.1).unwrap();
    assert_eq!(primary.name, "auscors");
    assert_eq!(primary.mountpoint, "SYDN00AUS0");
    assert!(primary.ssl);

    let fallback = fallback.unwrap();
    assert_eq!(fallback.name, "rtk2go");
    assert_eq!(fallback.mountpoint, "SYD_BASE");
    assert!(fallback.distance_km > 10.0 && fallback.distance_km < 30.0);
}

#[test]
fn test_format_requirement_selects_matching_stream() {
    let mut engine = engine_with(PaymentPriority::FreeFirst);
    add_streams(&mut engine);

    let criteria = SelectionCriteria {
        required_formats: vec!["RTCM 3.0".into()],
        ..Default::default()
    };
    let best = engine
        .find_best_filtered(SYDNEY.0, SYDNEY.1, &criteria)
        .unwrap();
    assert_eq!(best.name, "rtk2go");
    assert_eq!(best.format, "RTCM 3.0");
}

#[test]
fn test_distance_limit_reports_nearest_stream() {
    let mut engine = engine_with(PaymentPriority::FreeFirst);
    add_streams(&mut engine);

    let criteria = SelectionCriteria {
        max_distance_km: Some(10.0),
        ..Default::default()
    };
    let err = engine
        .find_best_filtered(-34.5, 150.9, &criteria)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DistanceLimitExceeded);
    match err {
        AtlasError::DistanceLimitExceeded { max_km, nearest_km } => {
            assert_eq!(max_km, 10.0);
            assert!(nearest_km > 10.0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_blacklisted_cell_hides_service() {
    let mut engine = engine_with(PaymentPriority::FreeFirst);
    let rtk2go = engine.catalog().find("rtk2go").unwrap().id;

    engine
        .blacklist(rtk2go, MOSCOW.0, MOSCOW.1, Some("no mountpoints nearby"))
        .unwrap();
    assert!(!names(&engine, MOSCOW).contains(&"rtk2go".to_string()));
    assert!(names(&engine, (57.5, 37.62)).contains(&"rtk2go".to_string()));

    engine.clear_blacklist();
    assert_eq!(names(&engine, MOSCOW)[0], "rtk2go");
}

#[test]
fn test_file_platform_survives_restart() {
    let dir = TempDir::new().unwrap();
    let catalog = definition::parse_definitions(CATALOG).unwrap();

    let mut engine = EngineBuilder::new()
        .catalog(catalog.clone())
        .build_with_platform(FilePlatform::new(dir.path()).unwrap())
        .unwrap();
    let rtk2go = engine.catalog().find("rtk2go").unwrap().id;
    engine.record_failure(rtk2go).unwrap();
    engine.record_failure(rtk2go).unwrap();
    engine.set_credentials("EFT", "surveyor", "secret").unwrap();
    drop(engine);

    let restarted = EngineBuilder::new()
        .catalog(catalog)
        .build_with_platform(FilePlatform::new(dir.path()).unwrap())
        .unwrap();
    assert!(restarted.is_blocked(rtk2go));
    assert_eq!(restarted.failure_state(rtk2go).failure_count, 2);
    assert_eq!(
        restarted.credentials().find("EFT").unwrap().password,
        "secret"
    );
}

#[test]
fn test_compiled_database_matches_definitions() {
    let dir = TempDir::new().unwrap();
    let yaml_path = dir.path().join("services.yaml");
    let db_path = dir.path().join("services.db");
    fs::write(&yaml_path, CATALOG).unwrap();

    let catalog = definition::load_definitions(&yaml_path).unwrap();
    let header = database::write_catalog(&db_path, &catalog, 20241130, 2).unwrap();
    assert_eq!(header.service_count, 4);
    assert_eq!(header.version_string(), "1.1 (20241130.02)");

    let from_yaml = engine_with(PaymentPriority::FreeFirst);
    let from_db = EngineBuilder::new()
        .database(&db_path)
        .build_with_platform(MemoryPlatform::new(T0))
        .unwrap();

    assert_eq!(from_db.catalog().providers(), from_yaml.catalog().providers());
    for position in [SYDNEY, MOSCOW] {
        assert_eq!(names(&from_db, position), names(&from_yaml, position));
    }
    let auscors = from_db.catalog().find("auscors").unwrap();
    assert_eq!(auscors.hostname, "auscors.ga.gov.au");
    assert_eq!(auscors.port, 443);
    assert!(auscors.ssl);
}
