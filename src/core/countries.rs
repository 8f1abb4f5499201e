//! Border-country set construction
//!
//! Builds the fixed set of destination countries for one run: adjacency
//! lookup, exclusions and additions, fuzzy joins against the reference
//! tables, per-run GDP normalization and one model prediction per row.

use log::{debug, info, warn};
use serde::Serialize;

use haven_common::fuzzy::{resolve_with, suggest_country, MatchPolicy, Resolution};
use haven_common::{Error, Result};

use crate::core::config::{MissingDataPolicy, RunConfig};
use crate::core::failures::{FailureKind, FailureLog};
use crate::core::model::{AttractivenessModel, Features};
use crate::core::tables::{ReferenceTables, YearTable};

/// A country bordering the conflict country, with its model score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BorderCountry {
    /// Name as spelled in the adjacency map
    pub name: String,
    /// ISO 3166 alpha-2 code
    pub iso_code: String,
    pub population: f64,
    pub gdp: f64,
    pub normalized_gdp: f64,
    pub democracy_index: f64,
    /// Always positive
    pub attractiveness: f64,
}

/// The country people are leaving
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictCountry {
    pub name: String,
    pub iso_code: String,
    /// Population in the reference year
    pub population: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountrySet {
    pub conflict: ConflictCountry,
    /// Adjacency order, exclusions removed, additions appended
    pub borders: Vec<BorderCountry>,
}

impl CountrySet {
    pub fn border(&self, name: &str) -> Option<&BorderCountry> {
        self.borders.iter().find(|b| b.name == name)
    }
}

/// Raw joined row before normalization and the missing-data policy
#[derive(Debug, Clone)]
struct JoinedRow {
    name: String,
    population: Option<f64>,
    gdp: Option<f64>,
    democracy_index: Option<f64>,
}

/// Record a low-confidence join and hand back the match index
fn accept_join(
    resolution: Resolution,
    query: &str,
    context: &str,
    failures: &mut FailureLog,
) -> Option<usize> {
    if let Resolution::LowConfidence(m) = &resolution {
        failures.record(
            FailureKind::LowConfidenceMatch,
            None,
            Some(query),
            format!("{context}: matched '{}' with score {}", m.matched, m.score),
        );
    }
    resolution.accepted().map(|m| m.index)
}

/// Column of `table` holding the reference year
fn year_column(
    table: &YearTable,
    year: i32,
    policy: MatchPolicy,
    failures: &mut FailureLog,
) -> Result<usize> {
    let wanted = year.to_string();
    if let Some(idx) = table.headers().iter().position(|h| *h == wanted) {
        return Ok(idx);
    }
    let resolution = resolve_with(&wanted, table.headers(), policy, table.name())?;
    accept_join(resolution, &wanted, table.name(), failures).ok_or_else(|| {
        Error::DataError(format!("{}: no column for year {year}", table.name()))
    })
}

/// Value of `country` in `table` at `column`, joined through the resolver
fn year_value(
    table: &YearTable,
    country: &str,
    column: usize,
    policy: MatchPolicy,
    failures: &mut FailureLog,
) -> Result<Option<f64>> {
    let resolution = resolve_with(country, table.countries(), policy, table.name())?;
    Ok(accept_join(resolution, country, table.name(), failures)
        .and_then(|row| table.value(row, column)))
}

/// Look up the bordering countries of `conflict`
///
/// An unknown conflict country is a configuration error with a suggestion.
pub fn bordering_countries<'a>(tables: &'a ReferenceTables, conflict: &str) -> Result<&'a [String]> {
    if let Some(list) = tables.adjacency.get(conflict) {
        return Ok(list);
    }
    let mut known: Vec<String> = tables.adjacency.keys().cloned().collect();
    known.sort();
    let message = match suggest_country(conflict, &known) {
        Some(suggestion) => {
            format!("Unknown conflict country '{conflict}'. Did you mean '{suggestion}'?")
        }
        None => format!("Unknown conflict country '{conflict}'"),
    };
    Err(Error::Configuration(message))
}

/// Apply exclusions and additions to the adjacency list
///
/// An exclusion removes a country only when it matches with at least
/// `exclusion_match_threshold`; a weaker match is logged and recorded.
pub fn candidate_country_names(
    config: &RunConfig,
    tables: &ReferenceTables,
    failures: &mut FailureLog,
) -> Result<Vec<String>> {
    let mut names = bordering_countries(tables, &config.conflict_country)?.to_vec();

    for excluded in config.excluded_list() {
        if names.is_empty() {
            break;
        }
        let resolution = resolve_with(
            &excluded,
            &names,
            MatchPolicy::RequireAtLeast(config.exclusion_match_threshold),
            "bordering countries",
        )?;
        match resolution.accepted() {
            Some(m) => {
                info!("Excluding {}", m.matched);
                names.remove(m.index);
            }
            None => {
                let best = resolution.best();
                failures.record(
                    FailureKind::LowConfidenceMatch,
                    None,
                    Some(&excluded),
                    format!(
                        "exclusion not applied: best match '{}' scored {}",
                        best.matched, best.score
                    ),
                );
            }
        }
    }

    for added in config.added_list()? {
        if names.contains(&added) {
            debug!("{added} already borders {}", config.conflict_country);
        } else {
            names.push(added);
        }
    }

    if names.is_empty() {
        return Err(Error::Configuration(format!(
            "No candidate countries left for {}",
            config.conflict_country
        )));
    }
    Ok(names)
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Min-max scale into `[0, 1]`; everything is 0 when all values are equal
pub fn normalize_min_max(value: f64, min: f64, max: f64) -> f64 {
    if max > min {
        (value - min) / (max - min)
    } else {
        0.0
    }
}

/// Build the run's country set
pub fn build_country_set(
    config: &RunConfig,
    tables: &ReferenceTables,
    model: &dyn AttractivenessModel,
    failures: &mut FailureLog,
) -> Result<CountrySet> {
    let year = config.reference_year();
    let policy = MatchPolicy::AcceptBest {
        warn_below: config.low_confidence_threshold,
    };
    let names = candidate_country_names(config, tables, failures)?;

    let pop_col = year_column(&tables.population, year, policy, failures)?;
    let gdp_col = year_column(&tables.gdp, year, policy, failures)?;

    let mut rows = Vec::with_capacity(names.len());
    for name in &names {
        let population = year_value(&tables.population, name, pop_col, policy, failures)?;
        let gdp = year_value(&tables.gdp, name, gdp_col, policy, failures)?;
        let dem = resolve_with(name, tables.democracy.countries(), policy, "democracy table")?;
        let democracy_index = accept_join(dem, name, "democracy table", failures)
            .and_then(|i| tables.democracy.countries().get(i))
            .and_then(|matched| tables.democracy.libdem(matched, year));
        rows.push(JoinedRow {
            name: name.clone(),
            population,
            gdp,
            democracy_index,
        });
    }

    let gdp_range = min_max(rows.iter().filter_map(|r| r.gdp));

    let mut borders = Vec::with_capacity(rows.len());
    for row in rows {
        let missing: Vec<&str> = [
            ("population", row.population.is_none()),
            ("gdp", row.gdp.is_none()),
            ("democracy index", row.democracy_index.is_none()),
        ]
        .into_iter()
        .filter_map(|(field, absent)| absent.then_some(field))
        .collect();

        if !missing.is_empty() {
            let fields = missing.join(", ");
            match config.missing_data_policy() {
                MissingDataPolicy::Drop => {
                    warn!("Dropping {}: missing {fields}", row.name);
                    failures.record(
                        FailureKind::MissingData,
                        None,
                        Some(&row.name),
                        format!("dropped, missing {fields}"),
                    );
                    continue;
                }
                MissingDataPolicy::FillZero => {
                    debug!("Filling {} with zero for {}", fields, row.name);
                    failures.record(
                        FailureKind::MissingData,
                        None,
                        Some(&row.name),
                        format!("filled with zero: {fields}"),
                    );
                }
            }
        }

        let gdp = row.gdp.unwrap_or(0.0);
        let normalized_gdp = match (row.gdp, gdp_range) {
            (Some(value), Some((lo, hi))) => normalize_min_max(value, lo, hi),
            _ => 0.0,
        };
        let features = Features {
            normalized_gdp,
            democracy_index: row.democracy_index.unwrap_or(0.0),
        };

        let predicted = model.predict(&features);
        let attractiveness = if predicted.is_finite() && predicted > 0.0 {
            predicted
        } else {
            warn!(
                "Non-positive attractiveness {predicted} for {}, clamping to {}",
                row.name, config.min_attractiveness
            );
            failures.record(
                FailureKind::ClampedAttractiveness,
                None,
                Some(&row.name),
                format!("predicted {predicted}, clamped to {}", config.min_attractiveness),
            );
            config.min_attractiveness
        };

        let iso = resolve_with(&row.name, tables.iso_codes.names(), policy, "ISO code table")?;
        let iso_code = accept_join(iso, &row.name, "ISO code table", failures)
            .and_then(|i| tables.iso_codes.code(i))
            .unwrap_or_default()
            .to_string();

        borders.push(BorderCountry {
            name: row.name,
            iso_code,
            population: row.population.unwrap_or(0.0),
            gdp,
            normalized_gdp,
            democracy_index: features.democracy_index,
            attractiveness,
        });
    }

    if borders.is_empty() {
        return Err(Error::DataError(format!(
            "Every bordering country of {} was dropped for missing data",
            config.conflict_country
        )));
    }

    let conflict = conflict_country(config, tables, pop_col, policy, failures)?;
    info!(
        "{} bordering countries for {} ({}), reference year {year}",
        borders.len(),
        conflict.name,
        conflict.iso_code
    );

    Ok(CountrySet { conflict, borders })
}

fn conflict_country(
    config: &RunConfig,
    tables: &ReferenceTables,
    pop_col: usize,
    policy: MatchPolicy,
    failures: &mut FailureLog,
) -> Result<ConflictCountry> {
    let name = &config.conflict_country;
    let population = year_value(&tables.population, name, pop_col, policy, failures)?
        .ok_or_else(|| {
            Error::DataError(format!(
                "No population for {name} in {}",
                config.reference_year()
            ))
        })?;

    let iso = resolve_with(name, tables.iso_codes.names(), policy, "ISO code table")?;
    let iso_code = accept_join(iso, name, "ISO code table", failures)
        .and_then(|i| tables.iso_codes.code(i))
        .ok_or_else(|| Error::DataError(format!("No ISO code for {name}")))?
        .to_string();

    Ok(ConflictCountry {
        name: name.clone(),
        iso_code,
        population,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::model::LinearShareModel;
    use crate::core::tables::{DemocracyTable, Gazetteer, IsoCodes};

    pub(crate) fn fixture_tables() -> ReferenceTables {
        let adjacency = [
            (
                "Ukraine".to_string(),
                vec![
                    "Poland".to_string(),
                    "Moldova".to_string(),
                    "Romania".to_string(),
                ],
            ),
            ("Moldova".to_string(), vec!["Ukraine".to_string(), "Romania".to_string()]),
        ]
        .into_iter()
        .collect();

        let population = YearTable::from_reader(
            "Country Name,2019,2020\n\
             Ukraine,44000000,10000000\n\
             Poland,38000000,38000000\n\
             \"Moldova, Republic of\",2700000,2600000\n\
             Romania,19000000,19000000\n\
             Hungary,9700000,9700000\n"
                .as_bytes(),
            "population table",
        )
        .unwrap();

        let gdp = YearTable::from_reader(
            "Country Name,2019,2020\n\
             Ukraine,150,155\n\
             Poland,590,600\n\
             Moldova,11,12\n\
             Romania,250,248\n\
             Hungary,160,\n"
                .as_bytes(),
            "GDP table",
        )
        .unwrap();

        let democracy = DemocracyTable::from_reader(
            "country_name,year,v2x_libdem\n\
             Poland,2020,0.5\n\
             Moldova,2020,0.4\n\
             Romania,2020,0.45\n\
             Hungary,2020,0.35\n"
                .as_bytes(),
        )
        .unwrap();

        let iso_codes = IsoCodes::from_reader(
            "English short name lower case,Alpha-2 code\n\
             Ukraine,UA\nPoland,PL\n\"Moldova, Republic of\",MD\nRomania,RO\nHungary,HU\n"
                .as_bytes(),
        )
        .unwrap();

        ReferenceTables {
            adjacency,
            population,
            gdp,
            democracy,
            iso_codes,
            gazetteer: Gazetteer::default(),
        }
    }

    fn config() -> RunConfig {
        RunConfig {
            conflict_country: "Ukraine".into(),
            ..RunConfig::default()
        }
    }

    fn model() -> LinearShareModel {
        LinearShareModel {
            intercept: 0.1,
            gdp_coefficient: 1.0,
            libdem_coefficient: 1.0,
        }
    }

    #[test]
    fn test_builds_normalized_border_set() {
        let mut failures = FailureLog::new();
        let set = build_country_set(&config(), &fixture_tables(), &model(), &mut failures).unwrap();

        let names: Vec<&str> = set.borders.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Poland", "Moldova", "Romania"]);

        let poland = set.border("Poland").unwrap();
        let moldova = set.border("Moldova").unwrap();
        assert_eq!(poland.normalized_gdp, 1.0);
        assert_eq!(moldova.normalized_gdp, 0.0);
        assert_eq!(poland.iso_code, "PL");
        assert_eq!(moldova.iso_code, "MD");
        assert_eq!(moldova.population, 2_600_000.0);
        assert!((poland.attractiveness - 1.6).abs() < 1e-12);

        assert_eq!(set.conflict.iso_code, "UA");
        assert_eq!(set.conflict.population, 10_000_000.0);
    }

    #[test]
    fn test_conflict_start_selects_previous_year() {
        let mut cfg = config();
        cfg.conflict_start = 2020;
        let mut failures = FailureLog::new();
        let set = build_country_set(&cfg, &fixture_tables(), &model(), &mut failures).unwrap();
        assert_eq!(set.conflict.population, 44_000_000.0);
    }

    #[test]
    fn test_exclusion_requires_strong_match() {
        let tables = fixture_tables();
        let mut cfg = config();
        cfg.excluded_countries = "poland, Atlantis".into();
        let mut failures = FailureLog::new();
        let names = candidate_country_names(&cfg, &tables, &mut failures).unwrap();

        // Case does not matter, but "Atlantis" matches nothing well enough
        assert_eq!(names, vec!["Moldova", "Romania"]);
        assert_eq!(failures.count(FailureKind::LowConfidenceMatch), 1);
        assert_eq!(failures.records()[0].candidate.as_deref(), Some("Atlantis"));
    }

    #[test]
    fn test_additions_are_appended() {
        let mut cfg = config();
        cfg.added_countries = "Hungary,Poland".into();
        let mut failures = FailureLog::new();
        let names = candidate_country_names(&cfg, &fixture_tables(), &mut failures).unwrap();
        assert_eq!(names, vec!["Poland", "Moldova", "Romania", "Hungary"]);
    }

    #[test]
    fn test_missing_data_policies() {
        let tables = fixture_tables();
        let mut cfg = config();
        cfg.added_countries = "Hungary".into();

        let mut failures = FailureLog::new();
        let filled = build_country_set(&cfg, &tables, &model(), &mut failures).unwrap();
        let hungary = filled.border("Hungary").unwrap();
        assert_eq!(hungary.gdp, 0.0);
        assert_eq!(hungary.normalized_gdp, 0.0);
        assert_eq!(failures.count(FailureKind::MissingData), 1);

        cfg.drop_missing_data = true;
        let mut failures = FailureLog::new();
        let dropped = build_country_set(&cfg, &tables, &model(), &mut failures).unwrap();
        assert!(dropped.border("Hungary").is_none());
        assert_eq!(dropped.borders.len(), 3);
    }

    #[test]
    fn test_non_positive_prediction_is_clamped() {
        let negative = |_: &Features| -0.5;
        let mut failures = FailureLog::new();
        let set = build_country_set(&config(), &fixture_tables(), &negative, &mut failures).unwrap();
        assert!(set.borders.iter().all(|b| b.attractiveness == 1e-6));
        assert_eq!(failures.count(FailureKind::ClampedAttractiveness), 3);
    }

    #[test]
    fn test_unknown_conflict_country_suggests() {
        let mut cfg = config();
        cfg.conflict_country = "Ukrane".into();
        let mut failures = FailureLog::new();
        let err = build_country_set(&cfg, &fixture_tables(), &model(), &mut failures).unwrap_err();
        match err {
            Error::Configuration(msg) => assert!(msg.contains("Did you mean 'Ukraine'")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_normalize_min_max() {
        assert_eq!(normalize_min_max(5.0, 0.0, 10.0), 0.5);
        assert_eq!(normalize_min_max(3.0, 3.0, 3.0), 0.0);
    }
}
