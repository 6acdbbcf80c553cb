use anyhow::Result;
use clap::{Parser, Subcommand};
use ntrip_atlas::PaymentPriority;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{CriteriaArgs, EngineOptions};

/// NTRIP correction service discovery CLI tool
#[derive(Parser)]
#[command(name = "ntrip-atlas")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Compiled .db file or YAML service definitions
    #[arg(short, long, env = "NTRIP_ATLAS_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Ordering of free and paid services: free-first or paid-first
    #[arg(
        short,
        long,
        env = "NTRIP_ATLAS_PAYMENT_PRIORITY",
        default_value = "free-first",
        global = true
    )]
    payment_priority: PaymentPriority,

    /// Directory that persists failure states and credentials
    #[arg(short, long, env = "NTRIP_ATLAS_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Ignore failure backoff when selecting services
    #[arg(long, global = true)]
    no_failure_tracking: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select the best service and mountpoint for a position
    Find {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// CSV file of caster mountpoints (service,name,lat,lon,format,...)
        #[arg(short, long)]
        mountpoints: PathBuf,

        #[command(flatten)]
        criteria: CriteriaArgs,

        /// Also select a backup from a different service
        #[arg(long)]
        fallback: bool,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List the services covering a position, best first
    Candidates {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Only free services
        #[arg(long)]
        free_only: bool,

        /// Minimum service quality (1-5)
        #[arg(long, default_value = "0")]
        min_quality: u8,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Select services for every position in a CSV file
    Batch {
        /// Input CSV file
        input: PathBuf,

        /// Output file (defaults to <input>_services.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// CSV file of caster mountpoints
        #[arg(short, long)]
        mountpoints: PathBuf,

        /// Column name for latitude
        #[arg(long, default_value = "lat")]
        lat_col: String,

        /// Column name for longitude
        #[arg(long, default_value = "lon")]
        lon_col: String,

        #[command(flatten)]
        criteria: CriteriaArgs,
    },

    /// Compile YAML service definitions into a database
    Build {
        /// YAML service definitions
        input: PathBuf,

        /// Output file (defaults to <input>.db)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Build date as YYYYMMDD (defaults to today, UTC)
        #[arg(long)]
        date: Option<u32>,

        /// Build number within the day
        #[arg(long, default_value = "0")]
        sequence: u8,
    },

    /// Display information about a database and the engine built from it
    Info {
        /// List every service currently backing off
        #[arg(long)]
        failures: bool,
    },

    /// Export service coverage areas as GeoJSON
    Coverage {
        /// Only services intersecting lat_min,lat_max,lon_min,lon_max
        #[arg(long, value_delimiter = ',', num_args = 4, allow_hyphen_values = true)]
        region: Option<Vec<f64>>,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ntrip_atlas=info".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let options = EngineOptions {
        database: cli.database,
        payment_priority: cli.payment_priority,
        state_dir: cli.state_dir,
        no_failure_tracking: cli.no_failure_tracking,
    };

    match cli.command {
        Commands::Find {
            lat,
            lon,
            mountpoints,
            criteria,
            fallback,
            json,
        } => commands::find::run(&options, lat, lon, mountpoints, criteria, fallback, json),
        Commands::Candidates {
            lat,
            lon,
            free_only,
            min_quality,
            json,
        } => commands::candidates::run(&options, lat, lon, free_only, min_quality, json),
        Commands::Batch {
            input,
            output,
            mountpoints,
            lat_col,
            lon_col,
            criteria,
        } => commands::batch::run(
            &options,
            input,
            output,
            mountpoints,
            lat_col,
            lon_col,
            criteria,
        ),
        Commands::Build {
            input,
            output,
            date,
            sequence,
        } => commands::build::run(input, output, date, sequence),
        Commands::Info { failures } => commands::info::run(&options, failures),
        Commands::Coverage { region, output } => commands::coverage::run(&options, region, output),
    }
}
