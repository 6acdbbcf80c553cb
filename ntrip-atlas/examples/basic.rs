//! Basic example demonstrating ntrip-atlas library usage.
//!
//! Run with: cargo run --example basic -- /path/to/services.yaml

use ntrip_atlas::{AtlasError, EngineBuilder, SelectionCriteria};
use std::env;

fn main() -> Result<(), AtlasError> {
    // Get the catalog (YAML definitions or compiled .db) from command line
    let database = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: cargo run --example basic -- /path/to/services.yaml");
        std::process::exit(1);
    });

    let engine = EngineBuilder::new().database(&database).build()?;

    let locations = [
        ("Sydney, Australia", -33.87, 151.21),
        ("Moscow, Russia", 55.75, 37.62),
        ("Boston, USA", 42.36, -71.06),
    ];

    println!("Services covering each location:");
    println!("{:-<60}", "");

    for (name, lat, lon) in &locations {
        match engine.rank(*lat, *lon, &SelectionCriteria::default()) {
            Ok(services) if services.is_empty() => println!("{}: no coverage", name),
            Ok(services) => {
                println!("{}:", name);
                for s in services.iter().take(3) {
                    let state = if s.usable { "" } else { " (needs credentials)" };
                    println!(
                        "  {} via {}:{} score {:.1}{}",
                        s.name, s.hostname, s.port, s.score, state
                    );
                }
            }
            Err(e) => println!("{}: error - {}", name, e),
        }
    }

    let stats = engine.index_stats();
    println!("\nIndex statistics:");
    println!("  Tiles: {} ({} populated)", stats.total_tiles, stats.populated_tiles);
    println!("  Assignments: {}", stats.total_assignments);
    println!("  Memory: {} bytes", stats.memory_bytes);

    Ok(())
}
