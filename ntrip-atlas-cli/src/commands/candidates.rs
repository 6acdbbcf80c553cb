use anyhow::{Context, Result};
use ntrip_atlas::{RankedService, SelectionCriteria};
use serde::Serialize;

use super::EngineOptions;

#[derive(Serialize)]
struct CandidatesResponse {
    lat: f64,
    lon: f64,
    level: u8,
    spatial_candidates: usize,
    verified: usize,
    services: Vec<RankedService>,
}

pub fn run(
    options: &EngineOptions,
    lat: f64,
    lon: f64,
    free_only: bool,
    min_quality: u8,
    json: bool,
) -> Result<()> {
    let engine = options.open()?;
    let criteria = SelectionCriteria {
        free_only,
        min_quality,
        ..Default::default()
    };

    let stats = engine
        .search_stats(lat, lon)
        .context("Failed to search the spatial index")?;
    let services = engine
        .rank(lat, lon, &criteria)
        .context("Failed to rank services")?;

    if json {
        let response = CandidatesResponse {
            lat,
            lon,
            level: stats.level,
            spatial_candidates: stats.spatial_candidates,
            verified: stats.verified,
            services,
        };
        println!("{}", serde_json::to_string(&response)?);
        return Ok(());
    }

    println!(
        "Level {} tile: {} candidates, {} verified ({:.0}% false positives)",
        stats.level,
        stats.spatial_candidates,
        stats.verified,
        stats.false_positive_rate() * 100.0
    );
    println!();

    if services.is_empty() {
        println!("No services cover this position");
        return Ok(());
    }

    println!(
        "{:<20} {:<28} {:>5} {:>8} {:>10} {:>7}",
        "SERVICE", "PROVIDER", "QUAL", "ACCESS", "CENTER KM", "SCORE"
    );
    println!("{}", "-".repeat(83));
    for s in &services {
        let access = match (s.paid, s.usable) {
            (_, false) => "unusable",
            (true, true) => "paid",
            (false, true) => "free",
        };
        println!(
            "{:<20} {:<28} {:>5} {:>8} {:>10.1} {:>7.1}",
            s.name, s.provider, s.quality, access, s.center_km, s.score
        );
    }

    Ok(())
}
