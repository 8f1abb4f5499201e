//! Output writers

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use haven_common::Result;

use crate::core::config::RunConfig;
use crate::core::countries::BorderCountry;
use crate::core::failures::FailureLog;
use crate::core::selector::{Aggregation, CrossingDirections, CrossingLogEntry, ExitAssignment};

#[derive(Debug, Serialize)]
struct CountryRow<'a> {
    country: &'a str,
    iso_code: &'a str,
    population: f64,
    gdp: f64,
    normalized_gdp: f64,
    democracy_index: f64,
    predicted_shares: f64,
}

#[derive(Debug, Serialize)]
struct AssignmentRow<'a> {
    origin: &'a str,
    origin_country: &'a str,
    conflict_year: i32,
    population: u64,
    destination: Option<&'a str>,
    crossing_latitude: Option<f64>,
    crossing_longitude: Option<f64>,
    duration_s: Option<f64>,
    distance_m: Option<f64>,
    cost: Option<f64>,
    total_refugees: u64,
}

#[derive(Debug, Serialize)]
struct CountryTotalRow<'a> {
    country: &'a str,
    total_refugees: u64,
}

/// Paths of every file a run wrote
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFiles {
    pub scored_countries: PathBuf,
    pub assignments: PathBuf,
    pub totals_by_country: PathBuf,
    pub exit_routes: PathBuf,
    pub crossing_directions: PathBuf,
    pub crossing_log: PathBuf,
    pub failures: PathBuf,
}

impl OutputFiles {
    pub fn for_config(config: &RunConfig) -> Self {
        Self {
            scored_countries: config.output_path("output_results.csv"),
            assignments: config.output_path("total_refugees.csv"),
            totals_by_country: config.output_path("total_refugees_by_country.csv"),
            exit_routes: config.output_dir.join(format!(
                "{}_exit_routes_{}.json",
                config.conflict_country, config.flight_mode
            )),
            crossing_directions: config.output_dir.join(format!(
                "{}_border_crossing_directions_{}.json",
                config.conflict_country, config.flight_mode
            )),
            crossing_log: config.output_path("crossing_log.csv"),
            failures: config.output_path("failures.csv"),
        }
    }

    pub fn all(&self) -> [&Path; 7] {
        [
            &self.scored_countries,
            &self.assignments,
            &self.totals_by_country,
            &self.exit_routes,
            &self.crossing_directions,
            &self.crossing_log,
            &self.failures,
        ]
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_scored_countries(path: &Path, borders: &[BorderCountry]) -> Result<()> {
    write_rows(
        path,
        borders.iter().map(|b| CountryRow {
            country: &b.name,
            iso_code: &b.iso_code,
            population: b.population,
            gdp: b.gdp,
            normalized_gdp: b.normalized_gdp,
            democracy_index: b.democracy_index,
            predicted_shares: b.attractiveness,
        }),
    )
}

/// One row per origin; refugee counts are truncated to whole people
pub fn write_assignments(
    path: &Path,
    assignments: &[ExitAssignment],
    aggregation: &Aggregation,
) -> Result<()> {
    write_rows(
        path,
        assignments
            .iter()
            .zip(&aggregation.per_origin)
            .map(|(a, estimate)| AssignmentRow {
                origin: &a.origin.name,
                origin_country: &a.origin.country,
                conflict_year: a.origin.conflict_year,
                population: a.origin.population,
                destination: a.destination.as_deref(),
                crossing_latitude: a.crossing.as_ref().map(|c| c.location.lat),
                crossing_longitude: a.crossing.as_ref().map(|c| c.location.lng),
                duration_s: a.duration_s,
                distance_m: a.distance_m,
                cost: a.cost,
                total_refugees: estimate.refugees.trunc() as u64,
            }),
    )
}

pub fn write_country_totals(path: &Path, aggregation: &Aggregation) -> Result<()> {
    write_rows(
        path,
        aggregation
            .by_country
            .iter()
            .map(|(country, total)| CountryTotalRow {
                country,
                total_refugees: total.trunc() as u64,
            }),
    )
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

pub fn write_exit_routes(path: &Path, assignments: &[ExitAssignment]) -> Result<()> {
    write_json(path, assignments)
}

pub fn write_crossing_directions(path: &Path, directions: &[CrossingDirections]) -> Result<()> {
    write_json(path, directions)
}

pub fn write_crossing_log(path: &Path, entries: &[CrossingLogEntry]) -> Result<()> {
    write_rows(path, entries)
}

pub fn write_failures(path: &Path, failures: &FailureLog) -> Result<()> {
    write_rows(path, failures.records())
}

/// Write every output of a run under the configured output directory
pub fn write_all(
    config: &RunConfig,
    borders: &[BorderCountry],
    assignments: &[ExitAssignment],
    aggregation: &Aggregation,
    crossing_log: &[CrossingLogEntry],
    crossing_directions: &[CrossingDirections],
    failures: &FailureLog,
) -> Result<OutputFiles> {
    fs::create_dir_all(&config.output_dir)?;
    let files = OutputFiles::for_config(config);

    write_scored_countries(&files.scored_countries, borders)?;
    write_assignments(&files.assignments, assignments, aggregation)?;
    write_country_totals(&files.totals_by_country, aggregation)?;
    write_exit_routes(&files.exit_routes, assignments)?;
    write_crossing_directions(&files.crossing_directions, crossing_directions)?;
    write_crossing_log(&files.crossing_log, crossing_log)?;
    write_failures(&files.failures, failures)?;

    info!("Wrote outputs to {}", config.output_dir.display());
    Ok(files)
}
