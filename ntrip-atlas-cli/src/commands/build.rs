use anyhow::{Context, Result};
use ntrip_atlas::{database, definition};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Today's UTC date as `YYYYMMDD`.
fn today() -> Result<u32> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before 1970")?
        .as_secs();
    Ok(civil_date((secs / 86_400) as i64))
}

/// Convert days since 1970-01-01 to a `YYYYMMDD` date.
fn civil_date(days: i64) -> u32 {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year * 10_000 + month * 100 + day) as u32
}

pub fn run(
    input: PathBuf,
    output: Option<PathBuf>,
    date: Option<u32>,
    sequence: u8,
) -> Result<()> {
    let catalog = definition::load_definitions(&input)
        .with_context(|| format!("Failed to load service definitions from {}", input.display()))?;

    let output_path = output.unwrap_or_else(|| input.with_extension("db"));
    let build_date = match date {
        Some(date) => date,
        None => today()?,
    };

    let header = database::write_catalog(&output_path, &catalog, build_date, sequence)
        .context("Failed to write database")?;

    println!(
        "Compiled {} services from {} providers",
        catalog.len(),
        catalog.providers().len()
    );
    println!("Schema version: {}", header.version_string());
    println!("Output written to: {}", output_path.display());
    Ok(())
}
