//! # Haven-route CLI
//!
//! Command-line interface for the haven-route library.
//! Estimates border crossings and refugee totals for a conflict country.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, warn};

use haven_route::core::config::API_KEY_ENV;
use haven_route::core::model::LinearShareModel;
use haven_route::core::nearby::{find_haven_cities, rank_by_travel_time, NearbyQuery};
use haven_route::core::router::LatLng;
use haven_route::core::tables::{Gazetteer, ReferenceTables};
use haven_route::core::{DirectionsClient, RunConfig, TravelMode};

mod cli;

/// Command-line interface for haven-route
#[derive(Parser)]
#[command(name = "haven-route")]
#[command(about = "Border-crossing and displacement estimates for conflict regions")]
#[command(long_about = "Estimates which neighbouring country people fleeing a conflict reach, and where they cross:
  haven-route run --config ukraine.json                 # Full run, outputs under ./outputs
  haven-route run --config ukraine.json --dry-run       # Resolve countries and origins only
  haven-route nearby --lat 50.45 --lng 30.52 \\
      --disaster-radius 50 --flight-radius 400 --rank   # Haven cities around a point

The router API key is read from the config or the GOOGLEMAPS_KEY environment variable.")]
#[command(version = env!("HAVEN_VERSION"))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Select exit routes for the largest cities of a conflict country
    Run(RunArgs),
    /// List haven cities around a disaster point
    Nearby(NearbyArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSON run configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Override the conflict country
    #[arg(long)]
    conflict_country: Option<String>,

    /// Override the travel mode (driving, walking, transit)
    #[arg(long)]
    mode: Option<TravelMode>,

    /// Override the attraction weight (0 = nearest crossing, 1 = most attractive country)
    #[arg(long)]
    attraction_weight: Option<f64>,

    /// Score every origin against all detected crossings
    #[arg(long)]
    shared_pool: bool,

    /// Resolve countries and origin cities without calling the router
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct NearbyArgs {
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,

    #[arg(long, allow_negative_numbers = true)]
    lng: f64,

    /// Cities closer than this (km) are inside the disaster area
    #[arg(long)]
    disaster_radius: f64,

    /// Cities further than this (km) are out of reach
    #[arg(long)]
    flight_radius: f64,

    /// Havens to return
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Most populous ring cities considered before ranking
    #[arg(long, default_value_t = 60)]
    candidates: usize,

    /// GeoNames city dump; defaults to the configured gazetteer
    #[arg(long)]
    gazetteer: Option<PathBuf>,

    /// JSON run configuration for data paths and router settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Order the cities by travel time through the router
    #[arg(long)]
    rank: bool,

    #[arg(long, default_value = "driving")]
    mode: TravelMode,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🧭 Haven-route v{} starting...", env!("HAVEN_VERSION"));
    }

    match cli.command {
        Command::Run(args) => run_estimate(args).await,
        Command::Nearby(args) => run_nearby(args).await,
    }
}

fn load_config(path: &PathBuf) -> Result<RunConfig> {
    let config = RunConfig::from_file(path)
        .with_context(|| format!("reading configuration {}", path.display()))?;
    Ok(config.with_env_api_key())
}

async fn run_estimate(args: RunArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(country) = args.conflict_country {
        config.conflict_country = country;
    }
    if let Some(mode) = args.mode {
        config.flight_mode = mode;
    }
    if let Some(weight) = args.attraction_weight {
        config.attraction_weight = weight;
    }
    if args.shared_pool {
        config.shared_crossing_pool = true;
    }
    config.validate()?;

    let tables = ReferenceTables::load(&config.data).context("loading reference tables")?;
    let model = LinearShareModel::from(&config.model);
    let plan = haven_route::plan(&config, &tables, &model)?;

    if args.dry_run {
        eprintln!(
            "🔍 [DRY RUN] {} ({}), {} people in {}",
            plan.countries.conflict.name,
            plan.countries.conflict.iso_code,
            plan.countries.conflict.population,
            config.reference_year()
        );
        for border in &plan.countries.borders {
            eprintln!(
                "   {:<24} attractiveness {:.4}",
                border.name, border.attractiveness
            );
        }
        for origin in &plan.origins {
            eprintln!("   origin {:<24} population {}", origin.name, origin.population);
        }
        eprintln!("   Would write outputs to {}", config.output_dir.display());
        return Ok(());
    }

    if config.router.api_key.is_none() {
        warn!("No router API key configured; set router.api_key or {API_KEY_ENV}");
    }

    let router = DirectionsClient::new(config.router.clone())?;

    let progress = cli::ProgressManager::new(
        plan.origins.len() as u64,
        &format!("🌐 Searching exit routes from {}", plan.countries.conflict.name),
    );
    let result = haven_route::estimate_planned(&config, &tables, &router, plan, |assignment| {
        progress.origin_done(&assignment.origin.name, assignment.destination.as_deref());
    })
    .await?;
    progress.finish();

    let files = haven_route::write_outputs(&config, &result)?;

    eprintln!("📊 Estimated refugees by country:");
    for (country, total) in &result.aggregation.by_country {
        eprintln!("   {country:<24} {:>12}", total.trunc() as u64);
    }
    let exhausted = result.report.exhausted().count();
    if exhausted > 0 {
        eprintln!("⚠️  {exhausted} origin(s) without a usable crossing");
    }
    for path in files.all() {
        eprintln!("📁 {}", path.display());
    }
    Ok(())
}

async fn run_nearby(args: NearbyArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RunConfig::default().with_env_api_key(),
    };
    let gazetteer_path = args.gazetteer.unwrap_or_else(|| config.data.gazetteer.clone());
    let gazetteer = Gazetteer::load(&gazetteer_path)
        .with_context(|| format!("loading gazetteer {}", gazetteer_path.display()))?;

    let start = LatLng::new(args.lat, args.lng);
    let mut query = NearbyQuery::new(start, args.disaster_radius, args.flight_radius);
    query.limit = args.limit;
    query.candidates = args.candidates;
    let mut havens = find_haven_cities(&gazetteer, &query)?;

    if args.rank {
        let router = DirectionsClient::new(config.router.clone())?;
        havens = rank_by_travel_time(&router, &query, havens, args.mode).await?;
    } else {
        havens.truncate(query.limit);
    }

    println!("{}", serde_json::to_string_pretty(&havens)?);
    Ok(())
}
