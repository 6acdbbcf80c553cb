use anyhow::{Context, Result};
use ntrip_atlas::{Database, TieredConfig, TieredDatabase};

use super::EngineOptions;

pub fn run(options: &EngineOptions, failures: bool) -> Result<()> {
    let path = options.database()?;
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Database not found: {}", path.display()))?;

    println!("Database: {}", path.display());
    println!(
        "  Size:      {} bytes ({:.1} KB)",
        metadata.len(),
        metadata.len() as f64 / 1024.0
    );

    let is_compiled = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("db"));
    if is_compiled {
        let db = Database::open(path).context("Failed to open database")?;
        let header = db.header();
        println!("  Schema:    {}", header.version_string());
        println!("  Features:  {:?}", header.features);
        println!("  Status:    {}", db.compatibility().message());

        let tiered = TieredDatabase::open(path, TieredConfig::default())
            .context("Failed to open tiered view")?;
        let stats = tiered.stats();
        println!(
            "  Resident:  {} bytes discovery tier ({:.1}% below {} bytes fully loaded)",
            stats.discovery_bytes,
            stats.reduction_percent(),
            stats.full_bytes
        );
    } else {
        println!("  Format:    YAML service definitions");
    }

    let engine = options.open()?;
    let catalog = engine.catalog();
    let free = catalog.services().iter().filter(|s| !s.is_paid()).count();

    println!();
    println!("Catalog:");
    println!("  Services:  {} ({} free, {} paid)", catalog.len(), free, catalog.len() - free);
    println!("  Providers: {}", catalog.providers().len());

    let index = engine.index_stats();
    println!();
    println!("Spatial index:");
    println!(
        "  Tiles:       {} ({} populated)",
        index.total_tiles, index.populated_tiles
    );
    println!("  Assignments: {}", index.total_assignments);
    println!(
        "  Per tile:    {:.1} avg, {} max",
        index.avg_services_per_tile, index.max_services_per_tile
    );
    println!("  Memory:      {} bytes", index.memory_bytes);

    let failure_stats = engine.failure_stats();
    let blacklist = engine.blacklist_stats();
    println!();
    println!("Runtime state:");
    println!(
        "  Failing services: {} ({} blocked)",
        failure_stats.services_with_failures, failure_stats.blocked_services
    );
    println!(
        "  Blacklisted cells: {} across {} services",
        blacklist.total_regions, blacklist.services_with_blacklists
    );

    if failures {
        for service in catalog.services() {
            let state = engine.failure_state(service.id);
            if state.is_clear() {
                continue;
            }
            let report = engine.failure_report(service.id)?;
            println!(
                "  {:<20} failures {:>3}, level {}, retry in {} h",
                report.service,
                report.failure_count,
                report.backoff_level,
                engine.retry_in_hours(service.id)
            );
        }
    }

    Ok(())
}
