use std::path::PathBuf;

use anyhow::{Context, Result};
use ntrip_atlas::BestService;
use serde::Serialize;

use super::{load_mountpoints, CriteriaArgs, EngineOptions};

#[derive(Serialize)]
struct FindResponse {
    lat: f64,
    lon: f64,
    best: BestService,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback: Option<BestService>,
}

fn print_service(label: &str, s: &BestService) {
    let scheme = if s.ssl { "https" } else { "http" };
    println!("{}: {} ({}://{}:{}/{})", label, s.name, scheme, s.server, s.port, s.mountpoint);
    println!(
        "  distance {:.1} km, score {:.1}, quality {}, format {}",
        s.distance_km, s.score, s.quality, s.format
    );
    if s.nmea_required {
        println!("  requires NMEA position upload");
    }
    if let Some(cred) = &s.credential {
        println!("  credentials: {}", cred.username);
    }
}

pub fn run(
    options: &EngineOptions,
    lat: f64,
    lon: f64,
    mountpoints: PathBuf,
    criteria: CriteriaArgs,
    fallback: bool,
    json: bool,
) -> Result<()> {
    let mut engine = options.open()?;
    load_mountpoints(&mut engine, &mountpoints)?;
    let criteria = criteria.to_criteria()?;

    let (best, fallback) = if fallback {
        engine.find_best_with_fallback_filtered(lat, lon, &criteria)
    } else {
        engine
            .find_best_filtered(lat, lon, &criteria)
            .map(|best| (best, None))
    }
    .with_context(|| format!("No service selected for {}, {}", lat, lon))?;

    if json {
        let response = FindResponse {
            lat,
            lon,
            best,
            fallback,
        };
        println!("{}", serde_json::to_string(&response)?);
    } else {
        print_service("Best", &best);
        if let Some(fallback) = &fallback {
            print_service("Fallback", fallback);
        }
    }

    Ok(())
}
