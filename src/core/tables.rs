//! Reference table loaders
//!
//! Tables are loaded once and never mutated. They store names exactly as
//! the source files spell them; joining against them always goes through
//! the fuzzy resolver in the caller, never through string equality here.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use haven_common::{Error, Result};

use crate::core::config::DataPaths;

/// Country name -> bordering country names, in source order
pub type AdjacencyMap = HashMap<String, Vec<String>>;

/// Load the country adjacency map
pub fn load_adjacency(path: &Path) -> Result<AdjacencyMap> {
    let file = File::open(path)?;
    let map: AdjacencyMap = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(map)
}

const COUNTRY_NAME_COLUMN: &str = "Country Name";

/// Wide table: one row per country, one column per year (population, GDP)
#[derive(Debug, Clone)]
pub struct YearTable {
    name: String,
    headers: Vec<String>,
    countries: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

impl YearTable {
    /// Parse a year table from CSV with a `Country Name` column
    pub fn from_reader<R: Read>(reader: R, name: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let country_idx = headers
            .iter()
            .position(|h| h == COUNTRY_NAME_COLUMN)
            .ok_or_else(|| {
                Error::DataError(format!("{name}: missing '{COUNTRY_NAME_COLUMN}' column"))
            })?;

        let mut countries = Vec::new();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let Some(country) = record.get(country_idx) else {
                continue;
            };
            countries.push(country.trim().to_string());
            rows.push(
                (0..headers.len())
                    .map(|i| record.get(i).and_then(parse_cell))
                    .collect(),
            );
        }

        debug!("Loaded {name}: {} countries, {} columns", countries.len(), headers.len());
        Ok(Self {
            name: name.to_string(),
            headers,
            countries,
            rows,
        })
    }

    pub fn load(path: &Path, name: &str) -> Result<Self> {
        Self::from_reader(File::open(path)?, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn countries(&self) -> &[String] {
        &self.countries
    }

    /// Value at a row/column position; missing cells are `None`
    pub fn value(&self, row: usize, column: usize) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.get(column).copied().flatten())
    }
}

/// One row of the long-format democracy table
#[derive(Debug, Clone, Deserialize)]
struct DemocracyRecord {
    country_name: String,
    year: i32,
    #[serde(default)]
    v2x_libdem: Option<f64>,
}

/// Liberal-democracy index per country and year
#[derive(Debug, Clone, Default)]
pub struct DemocracyTable {
    countries: Vec<String>,
    index: HashMap<(String, i32), Option<f64>>,
}

impl DemocracyTable {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut table = DemocracyTable::default();
        for record in rdr.deserialize() {
            let record: DemocracyRecord = record?;
            let name = record.country_name.trim().to_string();
            if !table.countries.contains(&name) {
                table.countries.push(name.clone());
            }
            table.index.insert((name, record.year), record.v2x_libdem);
        }
        debug!("Loaded democracy table: {} countries", table.countries.len());
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Distinct country names, in first-seen order
    pub fn countries(&self) -> &[String] {
        &self.countries
    }

    /// Index for an exact table spelling and year
    pub fn libdem(&self, country: &str, year: i32) -> Option<f64> {
        self.index
            .get(&(country.to_string(), year))
            .copied()
            .flatten()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct IsoRecord {
    #[serde(rename = "English short name lower case")]
    name: String,
    #[serde(rename = "Alpha-2 code")]
    alpha2: String,
}

/// Country name -> ISO 3166 alpha-2 code
#[derive(Debug, Clone, Default)]
pub struct IsoCodes {
    names: Vec<String>,
    codes: Vec<String>,
}

impl IsoCodes {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut table = IsoCodes::default();
        for record in rdr.deserialize() {
            let record: IsoRecord = record?;
            table.names.push(record.name.trim().to_string());
            table.codes.push(record.alpha2.trim().to_uppercase());
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn code(&self, index: usize) -> Option<&str> {
        self.codes.get(index).map(String::as_str)
    }
}

/// A populated place from the gazetteer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct City {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub feature_code: String,
    pub country_code: String,
    pub population: u64,
}

// GeoNames dump column positions
const COL_NAME: usize = 1;
const COL_LATITUDE: usize = 4;
const COL_LONGITUDE: usize = 5;
const COL_FEATURE_CODE: usize = 7;
const COL_COUNTRY_CODE: usize = 8;
const COL_POPULATION: usize = 14;

fn parse_city(record: &csv::StringRecord) -> Option<City> {
    Some(City {
        name: record.get(COL_NAME)?.trim().to_string(),
        latitude: record.get(COL_LATITUDE)?.trim().parse().ok()?,
        longitude: record.get(COL_LONGITUDE)?.trim().parse().ok()?,
        feature_code: record.get(COL_FEATURE_CODE)?.trim().to_string(),
        country_code: record.get(COL_COUNTRY_CODE)?.trim().to_uppercase(),
        population: record.get(COL_POPULATION)?.trim().parse().ok()?,
    })
}

/// City gazetteer (GeoNames tab-separated dump, no header row)
#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    cities: Vec<City>,
}

impl Gazetteer {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut cities = Vec::new();
        let mut skipped = 0usize;
        for record in rdr.records() {
            match parse_city(&record?) {
                Some(city) => cities.push(city),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("Gazetteer: skipped {skipped} malformed rows");
        }
        Ok(Self { cities })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    pub fn from_cities(cities: Vec<City>) -> Self {
        Self { cities }
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    /// The `n` most populous cities of a country, largest first
    ///
    /// Equal populations keep gazetteer order.
    pub fn largest_in(&self, country_code: &str, n: usize) -> Vec<&City> {
        let mut matching: Vec<&City> = self
            .cities
            .iter()
            .filter(|c| c.country_code.eq_ignore_ascii_case(country_code))
            .collect();
        matching.sort_by(|a, b| b.population.cmp(&a.population));
        matching.truncate(n);
        matching
    }
}

/// Every reference table a run joins against
#[derive(Debug, Clone)]
pub struct ReferenceTables {
    pub adjacency: AdjacencyMap,
    pub population: YearTable,
    pub gdp: YearTable,
    pub democracy: DemocracyTable,
    pub iso_codes: IsoCodes,
    pub gazetteer: Gazetteer,
}

impl ReferenceTables {
    pub fn load(paths: &DataPaths) -> Result<Self> {
        Ok(Self {
            adjacency: load_adjacency(&paths.country_borders)?,
            population: YearTable::load(&paths.historic_population, "population table")?,
            gdp: YearTable::load(&paths.historic_gdp, "GDP table")?,
            democracy: DemocracyTable::load(&paths.democracy)?,
            iso_codes: IsoCodes::load(&paths.iso_codes)?,
            gazetteer: Gazetteer::load(&paths.gazetteer)?,
        })
    }
}
