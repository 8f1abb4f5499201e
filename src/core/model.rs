//! Attractiveness model contract

use serde::Serialize;

use crate::core::config::ModelConfig;

/// Model inputs for one border country
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Features {
    /// GDP min-max scaled within the run's border countries
    pub normalized_gdp: f64,
    pub democracy_index: f64,
}

/// Predicts a destination's relative pull for displaced people
///
/// Implementations may return non-positive values; callers clamp them
/// before scoring.
pub trait AttractivenessModel: Send + Sync {
    fn predict(&self, features: &Features) -> f64;
}

/// Linear share model: `intercept + a * gdp + b * libdem`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearShareModel {
    pub intercept: f64,
    pub gdp_coefficient: f64,
    pub libdem_coefficient: f64,
}

impl From<&ModelConfig> for LinearShareModel {
    fn from(config: &ModelConfig) -> Self {
        Self {
            intercept: config.intercept,
            gdp_coefficient: config.gdp_coefficient,
            libdem_coefficient: config.libdem_coefficient,
        }
    }
}

impl AttractivenessModel for LinearShareModel {
    fn predict(&self, features: &Features) -> f64 {
        self.intercept
            + self.gdp_coefficient * features.normalized_gdp
            + self.libdem_coefficient * features.democracy_index
    }
}

impl<F> AttractivenessModel for F
where
    F: Fn(&Features) -> f64 + Send + Sync,
{
    fn predict(&self, features: &Features) -> f64 {
        self(features)
    }
}
