//! Candidate scoring
//!
//! `cost = (d / max_d) * (1 - w) + w / sqrt(a)`
//!
//! The duration term is relative to the slowest candidate in the cohort
//! being compared; the attractiveness term flattens as attractiveness grows.
//! Lower cost wins.

use haven_common::{Error, Result};

/// Blend travel time and attractiveness into one comparable cost
///
/// A zero cohort maximum or non-positive attractiveness is a
/// [`Error::DegenerateScore`]; neither is ever defaulted.
pub fn score(
    candidate_duration: f64,
    max_duration_in_cohort: f64,
    attractiveness: f64,
    attraction_weight: f64,
) -> Result<f64> {
    if !(0.0..=1.0).contains(&attraction_weight) {
        return Err(Error::InvalidInput(format!(
            "attraction weight {attraction_weight} outside [0, 1]"
        )));
    }
    if !max_duration_in_cohort.is_finite() || max_duration_in_cohort <= 0.0 {
        return Err(Error::DegenerateScore(format!(
            "cohort maximum duration is {max_duration_in_cohort}"
        )));
    }
    if !attractiveness.is_finite() || attractiveness <= 0.0 {
        return Err(Error::DegenerateScore(format!("attractiveness is {attractiveness}")));
    }
    if !candidate_duration.is_finite() || candidate_duration < 0.0 {
        return Err(Error::InvalidInput(format!(
            "candidate duration {candidate_duration} is not a valid duration"
        )));
    }

    let travel = (candidate_duration / max_duration_in_cohort) * (1.0 - attraction_weight);
    let pull = attraction_weight / attractiveness.sqrt();
    Ok(travel + pull)
}

/// Largest duration in a cohort, `None` when it is empty
pub fn cohort_max<I: IntoIterator<Item = f64>>(durations: I) -> Option<f64> {
    durations.into_iter().fold(None, |acc: Option<f64>, d| {
        Some(acc.map_or(d, |m| m.max(d)))
    })
}
