use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use super::{load_mountpoints, CriteriaArgs, EngineOptions};

const OUTPUT_COLUMNS: [&str; 6] = [
    "service",
    "server",
    "port",
    "mountpoint",
    "distance_km",
    "status",
];

#[allow(clippy::too_many_arguments)]
pub fn run(
    options: &EngineOptions,
    input: PathBuf,
    output: Option<PathBuf>,
    mountpoints: PathBuf,
    lat_col: String,
    lon_col: String,
    criteria: CriteriaArgs,
) -> Result<()> {
    let mut engine = options.open()?;
    let loaded = load_mountpoints(&mut engine, &mountpoints)?;
    let criteria = criteria.to_criteria()?;

    let file = File::open(&input).context("Failed to open input file")?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    let lat_idx = headers
        .iter()
        .position(|h| h == lat_col)
        .with_context(|| format!("Column '{}' not found in CSV", lat_col))?;
    let lon_idx = headers
        .iter()
        .position(|h| h == lon_col)
        .with_context(|| format!("Column '{}' not found in CSV", lon_col))?;

    let records: Vec<_> = reader.records().collect::<Result<_, _>>()?;
    tracing::info!(positions = records.len(), mountpoints = loaded, "batch selection started");

    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let output_path = output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "positions".to_string());
        input.with_file_name(format!("{}_services.csv", stem))
    });
    let output_file = File::create(&output_path).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(output_file));

    let mut new_headers: Vec<&str> = headers.iter().collect();
    new_headers.extend(OUTPUT_COLUMNS);
    writer.write_record(&new_headers)?;

    let mut selected = 0usize;
    for record in &records {
        let lat: f64 = record
            .get(lat_idx)
            .context("Missing latitude")?
            .trim()
            .parse()
            .context("Invalid latitude")?;
        let lon: f64 = record
            .get(lon_idx)
            .context("Missing longitude")?
            .trim()
            .parse()
            .context("Invalid longitude")?;

        let columns: Vec<String> = match engine.find_best_filtered(lat, lon, &criteria) {
            Ok(best) => {
                selected += 1;
                vec![
                    best.name,
                    best.server,
                    best.port.to_string(),
                    best.mountpoint,
                    format!("{:.2}", best.distance_km),
                    "ok".to_string(),
                ]
            }
            Err(e) => {
                let mut empty = vec![String::new(); OUTPUT_COLUMNS.len() - 1];
                empty.push(e.kind().as_str().to_string());
                empty
            }
        };

        let mut new_record: Vec<&str> = record.iter().collect();
        new_record.extend(columns.iter().map(String::as_str));
        writer.write_record(&new_record)?;

        pb.inc(1);
    }

    pb.finish_with_message("done");
    writer.flush()?;

    println!(
        "Selected a service for {} of {} positions",
        selected,
        records.len()
    );
    println!("Output written to: {}", output_path.display());
    Ok(())
}
