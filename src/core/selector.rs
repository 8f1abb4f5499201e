//! Exit-route selection
//!
//! Each origin city is searched independently: every border country is
//! routed to (falling back to its largest cities when the direct route
//! yields no crossing), detected crossings are scored against the origin's
//! own cohort, and the cheapest one becomes the origin's exit. Origins run
//! concurrently; results are put back in origin-rank order before anything
//! is aggregated.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;

use haven_common::{Error, Result};

use crate::core::config::{RunConfig, TravelMode};
use crate::core::countries::{BorderCountry, ConflictCountry, CountrySet};
use crate::core::crossing::{detect_crossing_observed, CrossingEvent};
use crate::core::failures::{FailureKind, FailureLog};
use crate::core::router::{chunked_distance_matrix, CandidateRoute, LatLng, Router, Waypoint};
use crate::core::scoring::{cohort_max, score};
use crate::core::tables::Gazetteer;

/// A city people leave from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginCity {
    pub name: String,
    pub country: String,
    pub location: LatLng,
    pub population: u64,
    pub conflict_year: i32,
}

impl OriginCity {
    fn place(&self) -> Waypoint {
        Waypoint::Place(format!("{}, {}", self.name, self.country))
    }
}

/// The `n` most populous gazetteer cities of the conflict country
pub fn select_origin_cities(
    gazetteer: &Gazetteer,
    conflict: &ConflictCountry,
    n: usize,
    conflict_year: i32,
) -> Result<Vec<OriginCity>> {
    let origins: Vec<OriginCity> = gazetteer
        .largest_in(&conflict.iso_code, n)
        .into_iter()
        .map(|city| OriginCity {
            name: city.name.clone(),
            country: conflict.name.clone(),
            location: LatLng::new(city.latitude, city.longitude),
            population: city.population,
            conflict_year,
        })
        .collect();
    if origins.is_empty() {
        return Err(Error::DataError(format!(
            "No gazetteer cities for {} ({})",
            conflict.name, conflict.iso_code
        )));
    }
    Ok(origins)
}

/// What a route was requested towards
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Destination {
    Country { name: String },
    City { name: String, country: String },
}

impl Destination {
    fn waypoint(&self) -> Waypoint {
        match self {
            Destination::Country { name } => Waypoint::Place(name.clone()),
            Destination::City { name, country } => Waypoint::Place(format!("{name}, {country}")),
        }
    }

    fn label(&self) -> String {
        self.waypoint().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OriginStatus {
    Found,
    Exhausted,
}

/// How a found exit was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssignmentSource {
    /// Per-origin route search
    Route,
    /// Distance-matrix pass over the shared crossing pool
    SharedPool,
}

/// Final exit decision for one origin city
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitAssignment {
    pub origin: OriginCity,
    pub status: OriginStatus,
    pub destination: Option<String>,
    /// Route target that produced the crossing
    pub via: Option<Destination>,
    /// Detected crossing point
    pub crossing: Option<CrossingEvent>,
    /// Travel from this origin to the crossing
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub cost: Option<f64>,
    pub source: Option<AssignmentSource>,
}

impl ExitAssignment {
    fn exhausted(origin: &OriginCity) -> Self {
        Self {
            origin: origin.clone(),
            status: OriginStatus::Exhausted,
            destination: None,
            via: None,
            crossing: None,
            duration_s: None,
            distance_m: None,
            cost: None,
            source: None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.status == OriginStatus::Found
    }
}

/// One entering-marker step seen by the detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossingLogEntry {
    pub origin: String,
    pub candidate: String,
    pub step_index: usize,
    pub region: String,
    pub similarity: u8,
    pub accepted: bool,
}

/// Turn-by-turn directions from an origin to the crossing it was assigned
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossingDirections {
    pub origin: String,
    pub destination: String,
    pub crossing: LatLng,
    pub route: CandidateRoute,
}

/// Knobs of the selector, taken from the run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorSettings {
    pub mode: TravelMode,
    pub attraction_weight: f64,
    pub similarity_threshold: u8,
    pub haven_cities: usize,
    pub max_fallback_attempts: usize,
    pub concurrency: usize,
    pub shared_crossing_pool: bool,
    pub matrix_chunk_size: usize,
}

impl From<&RunConfig> for SelectorSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            mode: config.flight_mode,
            attraction_weight: config.attraction_weight,
            similarity_threshold: config.crossing_similarity_threshold,
            haven_cities: config.number_haven_cities,
            max_fallback_attempts: config.max_fallback_attempts,
            concurrency: config.concurrency,
            shared_crossing_pool: config.shared_crossing_pool,
            matrix_chunk_size: config.matrix_chunk_size,
        }
    }
}

/// Everything the selector produced for a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionReport {
    /// One per origin, in origin-rank order
    pub assignments: Vec<ExitAssignment>,
    pub crossing_log: Vec<CrossingLogEntry>,
    pub failures: FailureLog,
    /// De-duplicated crossings found by the route search
    pub crossing_pool: Vec<CrossingEvent>,
}

impl SelectionReport {
    pub fn exhausted(&self) -> impl Iterator<Item = &ExitAssignment> {
        self.assignments.iter().filter(|a| !a.is_found())
    }
}

/// A crossing found for one border country during an origin's search
struct Detected<'c> {
    border: &'c BorderCountry,
    via: Destination,
    event: CrossingEvent,
}

/// Per-origin search result before merging
struct OriginSearch {
    assignment: ExitAssignment,
    events: Vec<CrossingEvent>,
    crossing_log: Vec<CrossingLogEntry>,
    failures: FailureLog,
}

pub struct ExitRouteSelector<'a, R: Router> {
    router: &'a R,
    countries: &'a CountrySet,
    gazetteer: &'a Gazetteer,
    settings: SelectorSettings,
}

impl<'a, R: Router> ExitRouteSelector<'a, R> {
    pub fn new(
        router: &'a R,
        countries: &'a CountrySet,
        gazetteer: &'a Gazetteer,
        settings: SelectorSettings,
    ) -> Self {
        Self {
            router,
            countries,
            gazetteer,
            settings,
        }
    }

    /// Candidate destinations for one border country, in try order
    fn candidates_for(&self, border: &BorderCountry) -> Vec<Destination> {
        let mut candidates = vec![Destination::Country {
            name: border.name.clone(),
        }];
        if !border.iso_code.is_empty() {
            candidates.extend(
                self.gazetteer
                    .largest_in(&border.iso_code, self.settings.haven_cities)
                    .into_iter()
                    .take(self.settings.max_fallback_attempts)
                    .map(|city| Destination::City {
                        name: city.name.clone(),
                        country: border.name.clone(),
                    }),
            );
        }
        candidates
    }

    /// Route to one candidate and look for the border into `country`
    async fn try_candidate(
        &self,
        origin: &OriginCity,
        destination: &Destination,
        country: &str,
        search: &mut OriginSearch,
    ) -> Option<CrossingEvent> {
        let label = destination.label();
        let route = match self
            .router
            .route(&origin.place(), &destination.waypoint(), self.settings.mode)
            .await
        {
            Ok(Some(route)) => route,
            Ok(None) => {
                debug!("{}: no route to {label}", origin.name);
                search.failures.record(
                    FailureKind::RouteUnavailable,
                    Some(&origin.name),
                    Some(&label),
                    "no route",
                );
                return None;
            }
            Err(e) => {
                debug!("{}: route to {label} failed: {e}", origin.name);
                search.failures.record(
                    FailureKind::RouteUnavailable,
                    Some(&origin.name),
                    Some(&label),
                    e.to_string(),
                );
                return None;
            }
        };

        let mut observations = Vec::new();
        let event = detect_crossing_observed(
            &route,
            country,
            self.settings.similarity_threshold,
            &mut observations,
        );
        search
            .crossing_log
            .extend(observations.into_iter().map(|o| CrossingLogEntry {
                origin: origin.name.clone(),
                candidate: label.clone(),
                step_index: o.step_index,
                region: o.region,
                similarity: o.similarity,
                accepted: o.accepted,
            }));

        if event.is_none() {
            search.failures.record(
                FailureKind::CrossingNotDetected,
                Some(&origin.name),
                Some(&label),
                format!("{} steps, no entry into {country}", route.steps.len()),
            );
        }
        event
    }

    async fn search_origin(&self, origin: &OriginCity) -> OriginSearch {
        let mut search = OriginSearch {
            assignment: ExitAssignment::exhausted(origin),
            events: Vec::new(),
            crossing_log: Vec::new(),
            failures: FailureLog::new(),
        };

        let mut detected = Vec::new();
        for border in &self.countries.borders {
            for destination in self.candidates_for(border) {
                if let Some(event) = self
                    .try_candidate(origin, &destination, &border.name, &mut search)
                    .await
                {
                    detected.push(Detected {
                        border,
                        via: destination,
                        event,
                    });
                    break;
                }
            }
        }

        search.events = detected.iter().map(|d| d.event.clone()).collect();

        match self.pick_cheapest(origin, &detected, &mut search.failures) {
            Some((index, cost)) => {
                let winner = &detected[index];
                debug!(
                    "{} -> {} via {} (cost {cost:.4})",
                    origin.name,
                    winner.border.name,
                    winner.via.label()
                );
                search.assignment = ExitAssignment {
                    origin: origin.clone(),
                    status: OriginStatus::Found,
                    destination: Some(winner.border.name.clone()),
                    via: Some(winner.via.clone()),
                    crossing: Some(winner.event.clone()),
                    duration_s: Some(winner.event.duration_s),
                    distance_m: Some(winner.event.distance_m),
                    cost: Some(cost),
                    source: Some(AssignmentSource::Route),
                };
            }
            None => warn!("{}: no usable crossing, origin exhausted", origin.name),
        }
        search
    }

    /// Index and cost of the cheapest detected crossing
    ///
    /// Costs are computed once every candidate is in, against the origin's
    /// cohort maximum; the first of equal costs wins.
    fn pick_cheapest(
        &self,
        origin: &OriginCity,
        detected: &[Detected<'_>],
        failures: &mut FailureLog,
    ) -> Option<(usize, f64)> {
        let max = cohort_max(detected.iter().map(|d| d.event.duration_s))?;
        let mut best: Option<(usize, f64)> = None;
        for (index, candidate) in detected.iter().enumerate() {
            match score(
                candidate.event.duration_s,
                max,
                candidate.border.attractiveness,
                self.settings.attraction_weight,
            ) {
                Ok(cost) => {
                    if best.map_or(true, |(_, lowest)| cost < lowest) {
                        best = Some((index, cost));
                    }
                }
                Err(e) => {
                    error!("{}: cannot score {}: {e}", origin.name, candidate.border.name);
                    failures.record(
                        FailureKind::DegenerateScore,
                        Some(&origin.name),
                        Some(&candidate.border.name),
                        e.to_string(),
                    );
                }
            }
        }
        best
    }

    /// Re-score an origin against every pooled crossing
    async fn pool_origin(
        &self,
        assignment: ExitAssignment,
        pool: &[CrossingEvent],
        failures: &mut FailureLog,
    ) -> ExitAssignment {
        let origin = &assignment.origin;
        let points: Vec<Waypoint> = pool.iter().map(|c| Waypoint::Point(c.location)).collect();
        let elements = match chunked_distance_matrix(
            self.router,
            &Waypoint::Point(origin.location),
            &points,
            self.settings.mode,
            self.settings.matrix_chunk_size,
        )
        .await
        {
            Ok(elements) => elements,
            Err(e) => {
                debug!("{}: crossing pool matrix failed: {e}", origin.name);
                failures.record(
                    FailureKind::RouteUnavailable,
                    Some(&origin.name),
                    Some("crossing pool"),
                    e.to_string(),
                );
                return assignment;
            }
        };

        let reachable: Vec<(&CrossingEvent, f64, f64)> = pool
            .iter()
            .zip(&elements)
            .filter_map(|(crossing, element)| {
                element
                    .usable()
                    .map(|(duration, distance)| (crossing, duration, distance))
            })
            .collect();
        let Some(max) = cohort_max(reachable.iter().map(|(_, d, _)| *d)) else {
            debug!("{}: no pooled crossing reachable", origin.name);
            return assignment;
        };

        let mut best: Option<(usize, f64)> = None;
        for (index, (crossing, duration, _)) in reachable.iter().enumerate() {
            let Some(border) = self.countries.border(&crossing.country) else {
                continue;
            };
            match score(*duration, max, border.attractiveness, self.settings.attraction_weight) {
                Ok(cost) => {
                    if best.map_or(true, |(_, lowest)| cost < lowest) {
                        best = Some((index, cost));
                    }
                }
                Err(e) => {
                    error!("{}: cannot score pooled crossing: {e}", origin.name);
                    failures.record(
                        FailureKind::DegenerateScore,
                        Some(&origin.name),
                        Some(&crossing.country),
                        e.to_string(),
                    );
                }
            }
        }

        match best {
            Some((index, cost)) => {
                let (crossing, duration, distance) = reachable[index];
                ExitAssignment {
                    origin: origin.clone(),
                    status: OriginStatus::Found,
                    destination: Some(crossing.country.clone()),
                    via: None,
                    crossing: Some(crossing.clone()),
                    duration_s: Some(duration),
                    distance_m: Some(distance),
                    cost: Some(cost),
                    source: Some(AssignmentSource::SharedPool),
                }
            }
            None => assignment,
        }
    }

    /// Directions from each found origin's coordinates to its crossing point
    ///
    /// Results follow assignment order; origins without a route are left out
    /// and recorded as `RouteUnavailable`.
    pub async fn crossing_directions(
        &self,
        assignments: &[ExitAssignment],
    ) -> (Vec<CrossingDirections>, FailureLog) {
        let found = assignments.iter().filter(|a| a.is_found()).filter_map(|a| {
            let destination = a.destination.as_ref()?;
            let crossing = a.crossing.as_ref()?;
            Some((a, destination, crossing.location))
        });

        let results: Vec<(Option<CrossingDirections>, FailureLog)> = stream::iter(found)
            .map(|(assignment, destination, crossing)| async move {
                let origin = &assignment.origin;
                let target = Waypoint::Point(crossing);
                let mut failures = FailureLog::new();
                let directions = match self
                    .router
                    .route(&Waypoint::Point(origin.location), &target, self.settings.mode)
                    .await
                {
                    Ok(Some(route)) => Some(CrossingDirections {
                        origin: origin.name.clone(),
                        destination: destination.clone(),
                        crossing,
                        route,
                    }),
                    Ok(None) => {
                        failures.record(
                            FailureKind::RouteUnavailable,
                            Some(&origin.name),
                            Some(&target.to_string()),
                            "no route to crossing",
                        );
                        None
                    }
                    Err(e) => {
                        debug!("{}: directions to crossing failed: {e}", origin.name);
                        failures.record(
                            FailureKind::RouteUnavailable,
                            Some(&origin.name),
                            Some(&target.to_string()),
                            e.to_string(),
                        );
                        None
                    }
                };
                (directions, failures)
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut failures = FailureLog::new();
        let mut directions = Vec::with_capacity(results.len());
        for (found, absorbed) in results {
            failures.extend(absorbed);
            directions.extend(found);
        }
        (directions, failures)
    }

    pub async fn run(&self, origins: &[OriginCity]) -> SelectionReport {
        self.run_with_progress(origins, |_| {}).await
    }

    /// Search every origin; `on_done` sees each assignment as it completes
    pub async fn run_with_progress<F>(&self, origins: &[OriginCity], on_done: F) -> SelectionReport
    where
        F: Fn(&ExitAssignment),
    {
        let concurrency = self.settings.concurrency.max(1);
        info!(
            "Searching exits for {} origins across {} countries ({} at a time)",
            origins.len(),
            self.countries.borders.len(),
            concurrency
        );

        let mut searches: Vec<(usize, OriginSearch)> = stream::iter(origins.iter().enumerate())
            .map(|(rank, origin)| async move { (rank, self.search_origin(origin).await) })
            .buffer_unordered(concurrency)
            .inspect(|(_, search)| on_done(&search.assignment))
            .collect()
            .await;
        searches.sort_by_key(|(rank, _)| *rank);

        let mut report = SelectionReport::default();
        for (_, search) in searches {
            for event in search.events {
                let seen = report
                    .crossing_pool
                    .iter()
                    .any(|c| c.country == event.country && c.location == event.location);
                if !seen {
                    report.crossing_pool.push(event);
                }
            }
            report.crossing_log.extend(search.crossing_log);
            report.failures.extend(search.failures);
            report.assignments.push(search.assignment);
        }

        if self.settings.shared_crossing_pool && !report.crossing_pool.is_empty() {
            info!(
                "Scoring {} origins against {} pooled crossings",
                report.assignments.len(),
                report.crossing_pool.len()
            );
            let pool = &report.crossing_pool;
            let mut pooled: Vec<(usize, ExitAssignment, FailureLog)> =
                stream::iter(report.assignments.drain(..).enumerate().collect::<Vec<_>>())
                    .map(|(rank, assignment)| async move {
                        let mut failures = FailureLog::new();
                        let assignment = self.pool_origin(assignment, pool, &mut failures).await;
                        (rank, assignment, failures)
                    })
                    .buffer_unordered(concurrency)
                    .collect()
                    .await;
            pooled.sort_by_key(|(rank, _, _)| *rank);
            for (_, assignment, failures) in pooled {
                report.failures.extend(failures);
                report.assignments.push(assignment);
            }
        }

        let exhausted = report.exhausted().count();
        if exhausted > 0 {
            warn!(
                "{exhausted} of {} origins exhausted; their population still counts in the total",
                report.assignments.len()
            );
        }
        report
    }
}

/// Refugees expected from one origin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplacementEstimate {
    pub origin: String,
    pub destination: Option<String>,
    pub refugees: f64,
}

/// Per-origin and per-country displacement
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Aligned with the assignments; exhausted origins carry 0
    pub per_origin: Vec<DisplacementEstimate>,
    pub by_country: BTreeMap<String, f64>,
    /// Population of every origin, found or exhausted
    pub total_origin_population: u64,
}

impl Aggregation {
    pub fn total(&self) -> f64 {
        self.by_country.values().sum()
    }
}

/// Spread `conflict_population * percent_leaving` over origins by population share
///
/// Exhausted origins stay in the denominator but send nobody anywhere, so
/// the total falls short of the leaving population when any origin is
/// exhausted.
pub fn aggregate(
    assignments: &[ExitAssignment],
    conflict_population: f64,
    percent_leaving: f64,
) -> Result<Aggregation> {
    let total_origin_population: u64 = assignments.iter().map(|a| a.origin.population).sum();
    if total_origin_population == 0 {
        return Err(Error::DataError("origin cities have no population".into()));
    }
    let leaving = conflict_population * percent_leaving;

    let mut by_country = BTreeMap::new();
    let per_origin = assignments
        .iter()
        .map(|a| {
            let refugees = match &a.destination {
                Some(country) if a.is_found() => {
                    let share = a.origin.population as f64 / total_origin_population as f64;
                    let refugees = share * leaving;
                    *by_country.entry(country.clone()).or_insert(0.0) += refugees;
                    refugees
                }
                _ => 0.0,
            };
            DisplacementEstimate {
                origin: a.origin.name.clone(),
                destination: a.destination.clone(),
                refugees,
            }
        })
        .collect();

    Ok(Aggregation {
        per_origin,
        by_country,
        total_origin_population,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::router::mock::{step, MockRouter};
    use crate::core::tables::City;

    fn border(name: &str, iso: &str, attractiveness: f64) -> BorderCountry {
        BorderCountry {
            name: name.into(),
            iso_code: iso.into(),
            population: 1.0,
            gdp: 1.0,
            normalized_gdp: 0.5,
            democracy_index: 0.5,
            attractiveness,
        }
    }

    fn countries(borders: Vec<BorderCountry>) -> CountrySet {
        CountrySet {
            conflict: ConflictCountry {
                name: "Ukraine".into(),
                iso_code: "UA".into(),
                population: 10_000_000.0,
            },
            borders,
        }
    }

    fn origin(name: &str, population: u64, lat: f64) -> OriginCity {
        OriginCity {
            name: name.into(),
            country: "Ukraine".into(),
            location: LatLng::new(lat, 30.0),
            population,
            conflict_year: 2022,
        }
    }

    fn settings(weight: f64) -> SelectorSettings {
        SelectorSettings {
            mode: TravelMode::Driving,
            attraction_weight: weight,
            similarity_threshold: 80,
            haven_cities: 2,
            max_fallback_attempts: 3,
            concurrency: 4,
            shared_crossing_pool: false,
            matrix_chunk_size: 25,
        }
    }

    fn city(name: &str, cc: &str, population: u64) -> City {
        City {
            name: name.into(),
            latitude: 50.0,
            longitude: 20.0,
            feature_code: "PPLA".into(),
            country_code: cc.into(),
            population,
        }
    }

    #[tokio::test]
    async fn test_nearest_crossing_wins_without_attraction() {
        let router = MockRouter::default()
            .with_route(
                "Odesa, Ukraine",
                "Poland",
                vec![step("Head west", 1500.0, 47.0, 28.0), step("Entering Poland", 500.0, 50.0, 23.0)],
            )
            .with_route(
                "Odesa, Ukraine",
                "Moldova",
                vec![step("Head north", 600.0, 46.6, 30.4), step("Entering Moldova", 400.0, 46.8, 29.6)],
            );
        let set = countries(vec![border("Poland", "PL", 100.0), border("Moldova", "MD", 0.01)]);
        let gazetteer = Gazetteer::default();
        let selector = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.0));

        let report = selector.run(&[origin("Odesa", 1_000_000, 46.5)]).await;
        let assignment = &report.assignments[0];
        assert_eq!(assignment.status, OriginStatus::Found);
        assert_eq!(assignment.destination.as_deref(), Some("Moldova"));
        assert_eq!(assignment.cost, Some(0.5));
        assert_eq!(assignment.duration_s, Some(1000.0));
        assert_eq!(report.crossing_log.len(), 2);
        assert_eq!(report.crossing_pool.len(), 2);
    }

    #[tokio::test]
    async fn test_attraction_weight_prefers_attractive_country() {
        let router = MockRouter::default()
            .with_route("Odesa, Ukraine", "Poland", vec![step("Entering Poland", 2000.0, 50.0, 23.0)])
            .with_route("Odesa, Ukraine", "Moldova", vec![step("Entering Moldova", 1000.0, 46.8, 29.6)]);
        let set = countries(vec![border("Poland", "PL", 4.0), border("Moldova", "MD", 0.25)]);
        let gazetteer = Gazetteer::default();
        let selector = ExitRouteSelector::new(&router, &set, &gazetteer, settings(1.0));

        let report = selector.run(&[origin("Odesa", 1_000_000, 46.5)]).await;
        assert_eq!(report.assignments[0].destination.as_deref(), Some("Poland"));
        assert_eq!(report.assignments[0].cost, Some(0.5));
    }

    #[tokio::test]
    async fn test_equal_costs_keep_adjacency_order() {
        let router = MockRouter::default()
            .with_route("Lviv, Ukraine", "Poland", vec![step("Entering Poland", 700.0, 50.0, 23.0)])
            .with_route("Lviv, Ukraine", "Slovakia", vec![step("Entering Slovakia", 700.0, 48.9, 22.2)]);
        let set = countries(vec![border("Poland", "PL", 1.0), border("Slovakia", "SK", 1.0)]);
        let gazetteer = Gazetteer::default();
        let selector = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.5));

        let report = selector.run(&[origin("Lviv", 700_000, 49.8)]).await;
        assert_eq!(report.assignments[0].destination.as_deref(), Some("Poland"));
    }

    #[tokio::test]
    async fn test_falls_back_to_largest_cities() {
        let router = MockRouter::default().with_route(
            "Lviv, Ukraine",
            "Krakow, Poland",
            vec![step("Head west", 3000.0, 49.9, 23.5), step("Entering Poland", 600.0, 50.0, 23.0)],
        );
        let set = countries(vec![border("Poland", "PL", 1.0)]);
        let gazetteer = Gazetteer::from_cities(vec![
            city("Warsaw", "PL", 1_700_000),
            city("Krakow", "PL", 770_000),
            city("Lodz", "PL", 680_000),
        ]);
        let selector = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.5));

        let report = selector.run(&[origin("Lviv", 700_000, 49.8)]).await;
        let assignment = &report.assignments[0];
        assert!(assignment.is_found());
        assert_eq!(
            assignment.via,
            Some(Destination::City {
                name: "Krakow".into(),
                country: "Poland".into()
            })
        );
        assert_eq!(assignment.duration_s, Some(3600.0));
        // Country, then Warsaw, then Krakow; Lodz is never needed
        assert_eq!(router.route_calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(report.failures.count(FailureKind::RouteUnavailable), 2);
    }

    #[tokio::test]
    async fn test_all_routes_unavailable_exhausts_origin() {
        let router = MockRouter {
            failing: vec!["Poland".into(), "Moldova".into()],
            ..MockRouter::default()
        };
        let set = countries(vec![border("Poland", "PL", 1.0), border("Moldova", "MD", 1.0)]);
        let gazetteer = Gazetteer::default();
        let selector = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.5));

        let report = selector
            .run(&[origin("Kyiv", 3_000_000, 50.4), origin("Kharkiv", 1_000_000, 50.0)])
            .await;
        assert_eq!(report.assignments.len(), 2);
        assert!(report.assignments.iter().all(|a| a.status == OriginStatus::Exhausted));
        assert!(report.assignments.iter().all(|a| a.destination.is_none()));
        assert_eq!(report.failures.count(FailureKind::RouteUnavailable), 4);
        assert_eq!(report.exhausted().count(), 2);
    }

    #[tokio::test]
    async fn test_route_without_entry_is_recorded() {
        let router = MockRouter::default().with_route(
            "Kyiv, Ukraine",
            "Poland",
            vec![step("Head west", 100.0, 50.0, 29.0), step("Entering Belarus", 100.0, 51.5, 30.0)],
        );
        let set = countries(vec![border("Poland", "PL", 1.0)]);
        let gazetteer = Gazetteer::default();
        let selector = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.5));

        let report = selector.run(&[origin("Kyiv", 3_000_000, 50.4)]).await;
        assert!(!report.assignments[0].is_found());
        assert_eq!(report.failures.count(FailureKind::CrossingNotDetected), 1);
        assert_eq!(report.crossing_log.len(), 1);
        assert!(!report.crossing_log[0].accepted);
    }

    #[tokio::test]
    async fn test_zero_duration_cohort_is_degenerate() {
        let router = MockRouter::default()
            .with_route("Uzhhorod, Ukraine", "Slovakia", vec![step("Entering Slovakia", 0.0, 48.6, 22.2)]);
        let set = countries(vec![border("Slovakia", "SK", 1.0)]);
        let gazetteer = Gazetteer::default();
        let selector = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.5));

        let report = selector.run(&[origin("Uzhhorod", 115_000, 48.6)]).await;
        assert!(!report.assignments[0].is_found());
        assert_eq!(report.failures.count(FailureKind::DegenerateScore), 1);
    }

    fn busy_router() -> MockRouter {
        let mut router = MockRouter::default();
        for (i, name) in ["Kyiv", "Kharkiv", "Odesa", "Dnipro", "Lviv", "Zaporizhzhia"]
            .iter()
            .enumerate()
        {
            let origin = format!("{name}, Ukraine");
            let base = 1000.0 * (i as f64 + 1.0);
            router = router
                .with_route(&origin, "Poland", vec![step("Entering Poland", base + 500.0, 50.0, 23.0)])
                .with_route(&origin, "Moldova", vec![step("Entering Moldova", base * 1.5, 46.8, 29.6)])
                .with_route(&origin, "Romania", vec![step("Entering Romania", base + 250.0, 47.9, 26.0)]);
        }
        router
    }

    fn busy_origins() -> Vec<OriginCity> {
        ["Kyiv", "Kharkiv", "Odesa", "Dnipro", "Lviv", "Zaporizhzhia"]
            .iter()
            .enumerate()
            .map(|(i, name)| origin(name, 500_000 * (i as u64 + 1), 50.0))
            .collect()
    }

    #[tokio::test]
    async fn test_repeated_runs_are_identical() {
        let router = busy_router();
        let set = countries(vec![
            border("Poland", "PL", 0.8),
            border("Moldova", "MD", 0.2),
            border("Romania", "RO", 0.5),
        ]);
        let gazetteer = Gazetteer::default();
        let origins = busy_origins();

        let sequential = ExitRouteSelector::new(
            &router,
            &set,
            &gazetteer,
            SelectorSettings {
                concurrency: 1,
                ..settings(0.3)
            },
        )
        .run(&origins)
        .await;
        let concurrent = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.3))
            .run(&origins)
            .await;
        let again = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.3))
            .run(&origins)
            .await;

        assert_eq!(sequential.assignments, concurrent.assignments);
        assert_eq!(concurrent, again);
        let names: Vec<&str> = concurrent.assignments.iter().map(|a| a.origin.name.as_str()).collect();
        assert_eq!(names, vec!["Kyiv", "Kharkiv", "Odesa", "Dnipro", "Lviv", "Zaporizhzhia"]);

        let a = aggregate(&sequential.assignments, 10_000_000.0, 0.1).unwrap();
        let b = aggregate(&again.assignments, 10_000_000.0, 0.1).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_shared_pool_rescues_exhausted_origin() {
        let mut router = MockRouter::default()
            .with_route("Lviv, Ukraine", "Poland", vec![step("Entering Poland", 900.0, 50.1, 23.9)])
            .with_route("Lviv, Ukraine", "Moldova", vec![step("Entering Moldova", 9000.0, 48.2, 27.4)]);
        router.matrix.insert("50.1,23.9".into(), 4000.0);
        router.matrix.insert("48.2,27.4".into(), 2000.0);

        let set = countries(vec![border("Poland", "PL", 1.0), border("Moldova", "MD", 1.0)]);
        let gazetteer = Gazetteer::default();
        let selector = ExitRouteSelector::new(
            &router,
            &set,
            &gazetteer,
            SelectorSettings {
                shared_crossing_pool: true,
                matrix_chunk_size: 1,
                ..settings(0.0)
            },
        );

        let report = selector
            .run(&[origin("Lviv", 700_000, 49.8), origin("Chernivtsi", 260_000, 48.3)])
            .await;

        assert_eq!(report.crossing_pool.len(), 2);
        let chernivtsi = &report.assignments[1];
        assert!(chernivtsi.is_found());
        assert_eq!(chernivtsi.source, Some(AssignmentSource::SharedPool));
        assert_eq!(chernivtsi.destination.as_deref(), Some("Moldova"));
        assert_eq!(chernivtsi.duration_s, Some(2000.0));
        assert_eq!(chernivtsi.cost, Some(0.5));
        // chunk size 1: one matrix call per pooled crossing per origin
        assert_eq!(*router.matrix_batches.lock().unwrap(), vec![1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_crossing_directions_for_found_origins() {
        let router = MockRouter::default()
            .with_route("Lviv, Ukraine", "Poland", vec![step("Entering Poland", 900.0, 50.1, 23.9)])
            .with_route(
                "49.8,30",
                "50.1,23.9",
                vec![step("Head west", 600.0, 49.9, 24.0), step("Entering Poland", 300.0, 50.1, 23.9)],
            );
        let set = countries(vec![border("Poland", "PL", 1.0)]);
        let gazetteer = Gazetteer::default();
        let selector = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.5));

        let report = selector
            .run(&[origin("Lviv", 700_000, 49.8), origin("Kyiv", 3_000_000, 50.4)])
            .await;
        let (directions, failures) = selector.crossing_directions(&report.assignments).await;

        assert_eq!(directions.len(), 1);
        assert_eq!(directions[0].origin, "Lviv");
        assert_eq!(directions[0].destination, "Poland");
        assert_eq!(directions[0].crossing, LatLng::new(50.1, 23.9));
        assert_eq!(directions[0].route.total_duration_s(), 900.0);
        // Kyiv is exhausted and never routed to a crossing
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn test_missing_crossing_directions_are_recorded() {
        let router = MockRouter::default()
            .with_route("Lviv, Ukraine", "Poland", vec![step("Entering Poland", 900.0, 50.1, 23.9)]);
        let set = countries(vec![border("Poland", "PL", 1.0)]);
        let gazetteer = Gazetteer::default();
        let selector = ExitRouteSelector::new(&router, &set, &gazetteer, settings(0.5));

        let report = selector.run(&[origin("Lviv", 700_000, 49.8)]).await;
        let (directions, failures) = selector.crossing_directions(&report.assignments).await;
        assert!(directions.is_empty());
        assert_eq!(failures.count(FailureKind::RouteUnavailable), 1);
        assert_eq!(failures.records()[0].candidate.as_deref(), Some("50.1,23.9"));
    }

    #[test]
    fn test_displacement_estimate_for_population_share() {
        let mut found = ExitAssignment::exhausted(&origin("Odesa", 500_000, 46.5));
        found.status = OriginStatus::Found;
        found.destination = Some("Moldova".into());
        let rest = ExitAssignment {
            status: OriginStatus::Found,
            destination: Some("Poland".into()),
            ..ExitAssignment::exhausted(&origin("Kyiv", 1_500_000, 50.4))
        };

        let agg = aggregate(&[found, rest], 10_000_000.0, 0.1).unwrap();
        assert_eq!(agg.per_origin[0].refugees, 250_000.0);
        assert_eq!(agg.by_country["Moldova"], 250_000.0);
        assert_eq!(agg.by_country["Poland"], 750_000.0);
        assert!((agg.total() - 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_exhausted_origins_stay_in_denominator() {
        let found = ExitAssignment {
            status: OriginStatus::Found,
            destination: Some("Poland".into()),
            ..ExitAssignment::exhausted(&origin("Lviv", 500_000, 49.8))
        };
        let exhausted = ExitAssignment::exhausted(&origin("Kharkiv", 1_500_000, 50.0));

        let agg = aggregate(&[found, exhausted], 10_000_000.0, 0.1).unwrap();
        assert_eq!(agg.total_origin_population, 2_000_000);
        assert_eq!(agg.per_origin[1].refugees, 0.0);
        assert_eq!(agg.total(), 250_000.0);
        assert!(agg.total() <= 10_000_000.0 * 0.1);
        assert!(!agg.by_country.contains_key(""));
    }

    #[test]
    fn test_aggregate_rejects_empty_population() {
        let err = aggregate(&[ExitAssignment::exhausted(&origin("Nowhere", 0, 0.0))], 1.0, 0.1)
            .unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }

    #[test]
    fn test_select_origin_cities() {
        let gazetteer = Gazetteer::from_cities(vec![
            city("Lviv", "UA", 717_000),
            city("Warsaw", "PL", 1_700_000),
            city("Kyiv", "UA", 2_900_000),
            city("Odesa", "UA", 1_000_000),
        ]);
        let set = countries(vec![]);
        let origins = select_origin_cities(&gazetteer, &set.conflict, 2, 2022).unwrap();
        let names: Vec<&str> = origins.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Kyiv", "Odesa"]);
        assert_eq!(origins[0].country, "Ukraine");
        assert_eq!(origins[0].conflict_year, 2022);

        let nowhere = ConflictCountry {
            name: "Atlantis".into(),
            iso_code: "AT".into(),
            population: 1.0,
        };
        assert!(select_origin_cities(&gazetteer, &nowhere, 2, 2022).is_err());
    }
}
