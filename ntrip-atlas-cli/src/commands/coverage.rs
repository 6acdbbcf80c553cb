use anyhow::{bail, Context, Result};
use ntrip_atlas::{geojson, load_catalog, BoundingBox};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use super::EngineOptions;

pub fn run(options: &EngineOptions, region: Option<Vec<f64>>, output: Option<PathBuf>) -> Result<()> {
    let path = options.database()?;
    let catalog = load_catalog(path)
        .with_context(|| format!("Failed to load catalog from {}", path.display()))?;

    let collection = match region {
        Some(bounds) => {
            let [lat_min, lat_max, lon_min, lon_max] = bounds[..] else {
                bail!("--region takes lat_min,lat_max,lon_min,lon_max");
            };
            let region = BoundingBox::from_degrees(lat_min, lat_max, lon_min, lon_max)
                .context("Invalid region")?;
            let ids = catalog.in_region(&region);
            let services = ids.iter().filter_map(|&id| catalog.get(id));
            geojson::coverage_features(&catalog, services)?
        }
        None => geojson::catalog_coverage(&catalog)?,
    };
    let count = collection.features.len();

    match output {
        Some(output_path) => {
            let file = File::create(&output_path).context("Failed to create output file")?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &collection)?;
            writer.flush()?;
            eprintln!("Exported {} services", count);
            println!("Output written to: {}", output_path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&collection)?),
    }

    Ok(())
}
