//! Run configuration for haven-route
//!
//! A run is described by a JSON file whose keys are all optional except
//! `conflict_country`. Validation happens before any table is read or any
//! router call is made.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use haven_common::{Error, Result};

/// Latest year the reference tables cover
pub const CONFLICT_YEAR_CEILING: i32 = 2021;

/// Upper bound on countries added to the bordering list
pub const MAX_ADDED_COUNTRIES: usize = 3;

/// Upper bound on router retries after the first attempt
pub const MAX_ROUTER_RETRIES: u32 = 10;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "GOOGLEMAPS_KEY";

/// How people travel toward the border
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    #[default]
    Driving,
    Walking,
    Transit,
}

impl TravelMode {
    /// Value understood by the directions provider
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Driving => "driving",
            TravelMode::Walking => "walking",
            TravelMode::Transit => "transit",
        }
    }
}

impl std::fmt::Display for TravelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TravelMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "driving" | "car" => Ok(TravelMode::Driving),
            "walking" | "foot" => Ok(TravelMode::Walking),
            "transit" => Ok(TravelMode::Transit),
            _ => Err(Error::Configuration(format!(
                "Invalid travel mode: {s}. Use driving, walking, or transit."
            ))),
        }
    }
}

/// What to do with a bordering country that lacks a model feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingDataPolicy {
    /// Remove the country from the run
    Drop,
    /// Substitute zero for the missing feature
    FillZero,
}

/// Coefficients of the linear attractiveness model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub intercept: f64,
    pub gdp_coefficient: f64,
    pub libdem_coefficient: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            intercept: 0.05,
            gdp_coefficient: 0.35,
            libdem_coefficient: 0.45,
        }
    }
}

/// Locations of the reference tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub country_borders: PathBuf,
    pub historic_population: PathBuf,
    pub historic_gdp: PathBuf,
    pub democracy: PathBuf,
    pub iso_codes: PathBuf,
    pub gazetteer: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            country_borders: PathBuf::from("data/country_border_data.json"),
            historic_population: PathBuf::from("data/historic_pop.csv"),
            historic_gdp: PathBuf::from("data/GDP_historic.csv"),
            democracy: PathBuf::from("data/country_dem.csv"),
            iso_codes: PathBuf::from("data/wikipedia-iso-country-codes.csv"),
            gazetteer: PathBuf::from("data/cities15000.txt"),
        }
    }
}

/// Directions provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Per-call timeout
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Retries after the first attempt, for network errors and 429/5xx
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    pub base_retry_delay_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://maps.googleapis.com/maps/api".to_string(),
            api_key: None,
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 3,
            base_retry_delay_ms: 1000,
        }
    }
}

/// Options for one displacement run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Key of the conflict country in the adjacency map
    pub conflict_country: String,
    /// Comma-separated bordering countries to leave out
    pub excluded_countries: String,
    /// Comma-separated countries to add (at most three are used)
    pub added_countries: String,
    pub conflict_start: i32,
    pub drop_missing_data: bool,
    pub flight_mode: TravelMode,
    /// Origin cities, largest first
    pub number_conflict_cities: usize,
    /// Representative cities tried per bordering country when no direct route exists
    pub number_haven_cities: usize,
    pub max_fallback_attempts: usize,
    pub percent_of_pop_leaving: f64,
    /// 0 picks the nearest crossing, 1 the most attractive country
    pub attraction_weight: f64,
    pub crossing_similarity_threshold: u8,
    pub exclusion_match_threshold: u8,
    pub low_confidence_threshold: u8,
    pub min_attractiveness: f64,
    pub shared_crossing_pool: bool,
    pub matrix_chunk_size: usize,
    /// Origin cities searched at the same time
    pub concurrency: usize,
    pub model: ModelConfig,
    pub data: DataPaths,
    pub router: RouterConfig,
    pub output_dir: PathBuf,

    /// Legacy top-level key for the provider API key
    #[serde(rename = "GOOGLEMAPS_KEY", skip_serializing)]
    pub googlemaps_key: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            conflict_country: String::new(),
            excluded_countries: String::new(),
            added_countries: String::new(),
            conflict_start: CONFLICT_YEAR_CEILING,
            drop_missing_data: false,
            flight_mode: TravelMode::default(),
            number_conflict_cities: 15,
            number_haven_cities: 1,
            max_fallback_attempts: 3,
            percent_of_pop_leaving: 0.1,
            attraction_weight: 1.0,
            crossing_similarity_threshold: 80,
            exclusion_match_threshold: 90,
            low_confidence_threshold: 80,
            min_attractiveness: 1e-6,
            shared_crossing_pool: false,
            matrix_chunk_size: 25,
            concurrency: num_cpus::get().clamp(1, 8),
            model: ModelConfig::default(),
            data: DataPaths::default(),
            router: RouterConfig::default(),
            output_dir: PathBuf::from("outputs"),
            googlemaps_key: None,
        }
    }
}

/// Split a comma list; the literal "None" and blank input mean an empty list
fn split_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "None" {
        return Vec::new();
    }
    trimmed.split(',').map(|s| s.trim().to_string()).collect()
}

impl RunConfig {
    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse a configuration from JSON text
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: RunConfig = serde_json::from_str(raw)
            .map_err(|e| Error::Configuration(format!("Malformed configuration: {e}")))?;
        if config.router.api_key.is_none() {
            config.router.api_key = config.googlemaps_key.take();
        }
        Ok(config)
    }

    /// Fill the API key from the environment when the file carries none
    pub fn with_env_api_key(mut self) -> Self {
        if self.router.api_key.is_none() {
            self.router.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }
        self
    }

    /// Check every option that can be checked without reading data
    pub fn validate(&self) -> Result<()> {
        if self.conflict_country.trim().is_empty() {
            return Err(Error::Configuration("conflict_country is required".to_string()));
        }
        if !(0.0..=1.0).contains(&self.attraction_weight) {
            return Err(Error::Configuration(format!(
                "attraction_weight must be within 0..1, got {}",
                self.attraction_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.percent_of_pop_leaving) {
            return Err(Error::Configuration(format!(
                "percent_of_pop_leaving must be within 0..1, got {}",
                self.percent_of_pop_leaving
            )));
        }
        if self.number_conflict_cities == 0 {
            return Err(Error::Configuration(
                "number_conflict_cities must be at least 1".to_string(),
            ));
        }
        if self.matrix_chunk_size == 0 || self.concurrency == 0 {
            return Err(Error::Configuration(
                "matrix_chunk_size and concurrency must be at least 1".to_string(),
            ));
        }
        if self.crossing_similarity_threshold > 100
            || self.exclusion_match_threshold > 100
            || self.low_confidence_threshold > 100
        {
            return Err(Error::Configuration(
                "similarity thresholds must be within 0..100".to_string(),
            ));
        }
        if self.router.max_retries > MAX_ROUTER_RETRIES {
            return Err(Error::Configuration(format!(
                "router.max_retries must be at most {MAX_ROUTER_RETRIES}, got {}",
                self.router.max_retries
            )));
        }
        if self.min_attractiveness.is_nan() || self.min_attractiveness <= 0.0 {
            return Err(Error::Configuration(
                "min_attractiveness must be positive".to_string(),
            ));
        }
        self.added_list()?;
        Ok(())
    }

    /// Year whose population, GDP and democracy figures describe the pre-conflict state
    pub fn reference_year(&self) -> i32 {
        self.conflict_start.min(CONFLICT_YEAR_CEILING) - 1
    }

    pub fn missing_data_policy(&self) -> MissingDataPolicy {
        if self.drop_missing_data {
            MissingDataPolicy::Drop
        } else {
            MissingDataPolicy::FillZero
        }
    }

    pub fn excluded_list(&self) -> Vec<String> {
        split_list(&self.excluded_countries)
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Added countries, truncated to [`MAX_ADDED_COUNTRIES`]
    pub fn added_list(&self) -> Result<Vec<String>> {
        let mut added = split_list(&self.added_countries);
        if added.iter().any(|s| s.is_empty()) {
            return Err(Error::Configuration(format!(
                "Malformed added_countries list: '{}'",
                self.added_countries
            )));
        }
        if added.len() > MAX_ADDED_COUNTRIES {
            added.truncate(MAX_ADDED_COUNTRIES);
            warn!("Too many added countries, only using: {}", added.join(", "));
        }
        Ok(added)
    }

    /// Output file path for this run
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_{suffix}", self.conflict_country, self.flight_mode))
    }
}
