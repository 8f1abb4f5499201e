//! Border-crossing detection from turn-by-turn instructions
//!
//! Providers announce a border with an "Entering <region>" phrase inside a
//! step's instruction. [`parse_entered_region`] is the only place that knows
//! the phrase format.

use serde::Serialize;

use haven_common::fuzzy::ratio;

use crate::core::router::{CandidateRoute, LatLng};

const ENTERING_MARKER: &str = "Entering";

/// Text segments of an HTML instruction, split at tags
fn text_segments(instructions: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut rest = instructions;
    while !rest.is_empty() {
        match rest.find('<') {
            Some(open) => {
                segments.push(&rest[..open]);
                rest = match rest[open..].find('>') {
                    Some(close) => &rest[open + close + 1..],
                    None => "",
                };
            }
            None => {
                segments.push(rest);
                rest = "";
            }
        }
    }
    segments
}

/// Region named by an entering-marker phrase, if the instruction has one
///
/// `"Turn left<div>Entering Moldova</div>"` and `"Entering <b>Moldova</b>"`
/// both yield `Moldova`.
pub fn parse_entered_region(instructions: &str) -> Option<String> {
    let segments = text_segments(instructions);
    let (pos, after) = segments.iter().enumerate().find_map(|(i, seg)| {
        seg.find(ENTERING_MARKER)
            .map(|at| (i, &seg[at + ENTERING_MARKER.len()..]))
    })?;

    let region = after.trim();
    if !region.is_empty() {
        return Some(region.to_string());
    }
    segments[pos + 1..]
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// First detected entry into the target country
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossingEvent {
    pub step_index: usize,
    /// Cumulative up to and including the crossing step
    pub duration_s: f64,
    pub distance_m: f64,
    pub location: LatLng,
    pub country: String,
}

/// An entering-marker step seen while scanning a route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossingObservation {
    pub step_index: usize,
    pub region: String,
    pub similarity: u8,
    pub accepted: bool,
}

/// Scan `route` for the first step entering `target_country`
///
/// A step matches when its extracted region scores strictly above
/// `similarity_threshold` against the target. Every marker step seen before
/// and including the match is pushed onto `observations`.
pub fn detect_crossing_observed(
    route: &CandidateRoute,
    target_country: &str,
    similarity_threshold: u8,
    observations: &mut Vec<CrossingObservation>,
) -> Option<CrossingEvent> {
    let mut duration_s = 0.0;
    let mut distance_m = 0.0;

    for (step_index, step) in route.steps.iter().enumerate() {
        duration_s += step.duration_s;
        distance_m += step.distance_m;

        let Some(region) = parse_entered_region(&step.instructions) else {
            continue;
        };
        let similarity = ratio(&region, target_country);
        let accepted = similarity > similarity_threshold;
        observations.push(CrossingObservation {
            step_index,
            region,
            similarity,
            accepted,
        });

        if accepted {
            return Some(CrossingEvent {
                step_index,
                duration_s,
                distance_m,
                location: step.end_location,
                country: target_country.to_string(),
            });
        }
    }
    None
}

/// [`detect_crossing_observed`] without the observation log
pub fn detect_crossing(
    route: &CandidateRoute,
    target_country: &str,
    similarity_threshold: u8,
) -> Option<CrossingEvent> {
    detect_crossing_observed(route, target_country, similarity_threshold, &mut Vec::new())
}
