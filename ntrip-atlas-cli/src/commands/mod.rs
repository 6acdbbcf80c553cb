pub mod batch;
pub mod build;
pub mod candidates;
pub mod coverage;
pub mod find;
pub mod info;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use ntrip_atlas::{
    AuthMethod, DiscoveryEngine, EngineBuilder, FilePlatform, Mountpoint, NetworkClass,
    PaymentPriority, Platform, SelectionCriteria, ServiceId, SystemPlatform,
};
use serde::Deserialize;

/// Engine whose platform is picked at runtime.
pub type Engine = DiscoveryEngine<Box<dyn Platform>>;

/// Settings shared by every command that needs an engine.
pub struct EngineOptions {
    pub database: Option<PathBuf>,
    pub payment_priority: PaymentPriority,
    pub state_dir: Option<PathBuf>,
    pub no_failure_tracking: bool,
}

impl EngineOptions {
    pub fn database(&self) -> Result<&Path> {
        self.database.as_deref().context(
            "NTRIP_ATLAS_DATABASE environment variable not set. Use --database or set NTRIP_ATLAS_DATABASE",
        )
    }

    /// Build the engine, with file persistence when a state directory is set.
    pub fn open(&self) -> Result<Engine> {
        let platform: Box<dyn Platform> = match &self.state_dir {
            Some(dir) => Box::new(
                FilePlatform::new(dir)
                    .with_context(|| format!("Failed to open state directory {}", dir.display()))?,
            ),
            None => Box::new(SystemPlatform),
        };

        EngineBuilder::new()
            .database(self.database()?)
            .payment_priority(self.payment_priority)
            .failure_tracking(!self.no_failure_tracking)
            .build_with_platform(platform)
            .context("Failed to create discovery engine")
    }
}

/// Query constraints accepted by `find` and `batch`.
#[derive(Args, Debug, Clone, Default)]
pub struct CriteriaArgs {
    /// Required stream format, e.g. "RTCM 3" (repeatable)
    #[arg(long = "format")]
    pub formats: Vec<String>,

    /// Required constellation, e.g. "GAL" (repeatable)
    #[arg(long = "system")]
    pub systems: Vec<String>,

    /// Minimum bitrate in bits per second
    #[arg(long, default_value = "0")]
    pub min_bitrate: u32,

    /// Most complex authentication allowed: none, basic or digest
    #[arg(long)]
    pub max_auth: Option<String>,

    /// Only free services and mountpoints
    #[arg(long)]
    pub free_only: bool,

    /// Maximum distance to the mountpoint in kilometres
    #[arg(long)]
    pub max_distance: Option<f64>,

    /// Minimum service quality (1-5)
    #[arg(long, default_value = "0")]
    pub min_quality: u8,

    /// Preferred network: government, commercial, research or community
    #[arg(long)]
    pub prefer_network: Option<String>,
}

fn parse_auth(s: &str) -> Result<AuthMethod> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "none" => AuthMethod::None,
        "basic" => AuthMethod::Basic,
        "digest" => AuthMethod::Digest,
        other => bail!("Unknown authentication method: {}", other),
    })
}

fn parse_network(s: &str) -> Result<NetworkClass> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "government" | "gov" => NetworkClass::Government,
        "commercial" => NetworkClass::Commercial,
        "research" => NetworkClass::Research,
        "community" => NetworkClass::Community,
        other => bail!("Unknown network class: {}", other),
    })
}

impl CriteriaArgs {
    pub fn to_criteria(&self) -> Result<SelectionCriteria> {
        Ok(SelectionCriteria {
            required_formats: self.formats.clone(),
            required_systems: self.systems.clone(),
            min_bitrate: self.min_bitrate,
            max_auth: self.max_auth.as_deref().map(parse_auth).transpose()?,
            free_only: self.free_only,
            max_distance_km: self.max_distance,
            min_quality: self.min_quality,
            preferred_network: self
                .prefer_network
                .as_deref()
                .map(parse_network)
                .transpose()?,
        })
    }
}

/// One row of a mountpoint CSV file.
#[derive(Debug, Deserialize)]
struct MountpointRow {
    service: String,
    name: String,
    #[serde(default)]
    identifier: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    format: String,
    #[serde(default)]
    format_details: String,
    #[serde(default)]
    nav_system: String,
    #[serde(default)]
    bitrate: u32,
    #[serde(default)]
    nmea_required: bool,
    #[serde(default)]
    auth: AuthMethod,
    #[serde(default)]
    fee_required: bool,
}

impl From<MountpointRow> for Mountpoint {
    fn from(row: MountpointRow) -> Self {
        Mountpoint {
            name: row.name,
            identifier: row.identifier,
            lat: row.lat,
            lon: row.lon,
            format: row.format,
            format_details: row.format_details,
            nav_system: row.nav_system,
            bitrate: row.bitrate,
            nmea_required: row.nmea_required,
            auth: row.auth,
            fee_required: row.fee_required,
        }
    }
}

/// Ingest mountpoints from a CSV file with a `service` column naming the
/// catalog service of each row. Returns the number of rows read.
pub fn load_mountpoints(engine: &mut Engine, path: &Path) -> Result<usize> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open mountpoint file {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    let mut grouped: BTreeMap<ServiceId, Vec<Mountpoint>> = BTreeMap::new();
    let mut rows = 0;
    for row in reader.deserialize::<MountpointRow>() {
        let row = row.context("Invalid mountpoint row")?;
        let service = engine
            .catalog()
            .find(&row.service)
            .with_context(|| format!("Mountpoint '{}' names an unknown service", row.name))?
            .id;
        grouped.entry(service).or_default().push(row.into());
        rows += 1;
    }

    for (service, mountpoints) in grouped {
        engine
            .ingest_mountpoints(service, mountpoints)
            .with_context(|| format!("Failed to ingest mountpoints for service {}", service))?;
    }
    tracing::debug!(rows, path = %path.display(), "mountpoints loaded");
    Ok(rows)
}
