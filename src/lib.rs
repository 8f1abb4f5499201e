//! # Haven-route Library
//!
//! Estimates where people fleeing a conflict are likely to cross the border,
//! and how many reach each neighbouring country.
//!
//! ## Features
//!
//! - **Fuzzy reference joins**: every table join goes through an explicit resolver policy
//! - **Border-crossing detection** from turn-by-turn directions
//! - **Cost blending** of travel time and model-predicted attractiveness
//! - **Concurrent, deterministic** per-origin exit selection
//! - **Failure log** of every absorbed routing or data problem
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use haven_route::core::RunConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::from_file(std::path::Path::new("config.json"))?.with_env_api_key();
//!     let result = haven_route::run(&config).await?;
//!     for (country, refugees) in &result.aggregation.by_country {
//!         println!("{country}: {refugees:.0}");
//!     }
//!     Ok(())
//! }
//! ```

pub use haven_common::fuzzy::{resolve, resolve_with, Match, MatchPolicy, Resolution};
pub use haven_common::{Error, Result};

pub mod core;

use log::info;

use crate::core::countries::build_country_set;
use crate::core::model::{AttractivenessModel, LinearShareModel};
use crate::core::report::{write_all, OutputFiles};
use crate::core::selector::{
    aggregate, select_origin_cities, Aggregation, CrossingDirections, OriginCity, SelectorSettings,
};
use crate::core::tables::ReferenceTables;
use crate::core::{CountrySet, DirectionsClient, ExitAssignment, ExitRouteSelector, FailureLog, Router, RunConfig, SelectionReport};

/// Everything fixed before the first router call
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub countries: CountrySet,
    pub origins: Vec<OriginCity>,
    /// Data-quality failures absorbed while building the plan
    pub failures: FailureLog,
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub countries: CountrySet,
    /// Failures include those recorded while planning
    pub report: SelectionReport,
    pub aggregation: Aggregation,
    /// Directions from each found origin to its crossing point
    pub crossing_directions: Vec<CrossingDirections>,
}

impl RunResult {
    pub fn assignments(&self) -> &[ExitAssignment] {
        &self.report.assignments
    }

    pub fn failures(&self) -> &FailureLog {
        &self.report.failures
    }
}

/// Validate the configuration, then build the country set and origin cities
pub fn plan(
    config: &RunConfig,
    tables: &ReferenceTables,
    model: &dyn AttractivenessModel,
) -> Result<RunPlan> {
    config.validate()?;
    let mut failures = FailureLog::new();
    let countries = build_country_set(config, tables, model, &mut failures)?;
    let origins = select_origin_cities(
        &tables.gazetteer,
        &countries.conflict,
        config.number_conflict_cities,
        config.reference_year(),
    )?;
    info!(
        "Planned {} origins in {} towards {} countries",
        origins.len(),
        countries.conflict.name,
        countries.borders.len()
    );
    Ok(RunPlan {
        countries,
        origins,
        failures,
    })
}

/// Run the whole estimate against already-loaded tables and a router
///
/// Nothing is written to disk; see [`write_outputs`].
pub async fn estimate<R, F>(
    config: &RunConfig,
    tables: &ReferenceTables,
    router: &R,
    model: &dyn AttractivenessModel,
    on_origin_done: F,
) -> Result<RunResult>
where
    R: Router,
    F: Fn(&ExitAssignment),
{
    let plan = plan(config, tables, model)?;
    estimate_planned(config, tables, router, plan, on_origin_done).await
}

/// Route an already-built [`RunPlan`]; `on_origin_done` fires once per planned origin
pub async fn estimate_planned<R, F>(
    config: &RunConfig,
    tables: &ReferenceTables,
    router: &R,
    plan: RunPlan,
    on_origin_done: F,
) -> Result<RunResult>
where
    R: Router,
    F: Fn(&ExitAssignment),
{
    let RunPlan {
        countries,
        origins,
        failures,
    } = plan;

    let selector = ExitRouteSelector::new(
        router,
        &countries,
        &tables.gazetteer,
        SelectorSettings::from(config),
    );
    let mut report = selector.run_with_progress(&origins, on_origin_done).await;
    let (crossing_directions, direction_failures) =
        selector.crossing_directions(&report.assignments).await;

    let mut all_failures = failures;
    all_failures.extend(std::mem::take(&mut report.failures));
    all_failures.extend(direction_failures);
    report.failures = all_failures;

    let aggregation = aggregate(
        &report.assignments,
        countries.conflict.population,
        config.percent_of_pop_leaving,
    )?;
    report.failures.log_summary();

    Ok(RunResult {
        countries,
        report,
        aggregation,
        crossing_directions,
    })
}

/// Write every output file of a finished run
pub fn write_outputs(config: &RunConfig, result: &RunResult) -> Result<OutputFiles> {
    write_all(
        config,
        &result.countries.borders,
        &result.report.assignments,
        &result.aggregation,
        &result.report.crossing_log,
        &result.crossing_directions,
        &result.report.failures,
    )
}

/// Run with the configured tables, model and HTTP router, then write outputs
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = haven_route::core::RunConfig::from_json(r#"{"conflict_country": "Ukraine"}"#)?;
/// let result = haven_route::run(&config).await?;
/// println!("{} origins exhausted", result.report.exhausted().count());
/// # Ok(())
/// # }
/// ```
pub async fn run(config: &RunConfig) -> Result<RunResult> {
    run_with_progress(config, |_| {}).await
}

/// [`run`] with a callback for each finished origin
pub async fn run_with_progress<F>(config: &RunConfig, on_origin_done: F) -> Result<RunResult>
where
    F: Fn(&ExitAssignment),
{
    config.validate()?;
    let tables = ReferenceTables::load(&config.data)?;
    let router = DirectionsClient::new(config.router.clone())?;
    let model = LinearShareModel::from(&config.model);

    let result = estimate(config, &tables, &router, &model, on_origin_done).await?;
    write_outputs(config, &result)?;
    Ok(result)
}
