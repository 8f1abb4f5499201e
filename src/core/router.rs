//! Router contract and route value types

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use haven_common::{Error, Result};

use crate::core::config::TravelMode;

/// WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Origin or destination of a router query
#[derive(Debug, Clone, PartialEq)]
pub enum Waypoint {
    /// Free-text place, geocoded by the provider ("Lviv, Ukraine", "Poland")
    Place(String),
    Point(LatLng),
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Waypoint::Place(name) => f.write_str(name),
            Waypoint::Point(p) => write!(f, "{},{}", p.lat, p.lng),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStep {
    /// Provider's human-readable instruction, possibly HTML
    pub instructions: String,
    pub duration_s: f64,
    pub distance_m: f64,
    pub end_location: LatLng,
    /// Encoded polyline of the step, kept as received
    pub polyline: String,
}

/// Turn-by-turn route to one candidate destination
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandidateRoute {
    pub steps: Vec<RouteStep>,
}

impl CandidateRoute {
    pub fn total_duration_s(&self) -> f64 {
        self.steps.iter().map(|s| s.duration_s).sum()
    }
}

/// One destination of a distance-matrix query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixElement {
    /// Provider status; only `OK` elements carry usable values
    pub status: String,
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
}

impl MatrixElement {
    pub fn ok(duration_s: f64, distance_m: f64) -> Self {
        Self {
            status: "OK".to_string(),
            duration_s: Some(duration_s),
            distance_m: Some(distance_m),
        }
    }

    pub fn unavailable(status: &str) -> Self {
        Self {
            status: status.to_string(),
            duration_s: None,
            distance_m: None,
        }
    }

    /// Duration and distance when the element is usable
    pub fn usable(&self) -> Option<(f64, f64)> {
        if self.status != "OK" {
            return None;
        }
        Some((self.duration_s?, self.distance_m.unwrap_or(0.0)))
    }
}

/// A fallible, remote routing service
///
/// `route` returns `Ok(None)` when the provider has no route; errors are
/// transport or protocol failures.
pub trait Router: Send + Sync {
    fn route(
        &self,
        origin: &Waypoint,
        destination: &Waypoint,
        mode: TravelMode,
    ) -> impl Future<Output = Result<Option<CandidateRoute>>> + Send;

    /// One element per destination, in destination order
    fn distance_matrix(
        &self,
        origin: &Waypoint,
        destinations: &[Waypoint],
        mode: TravelMode,
    ) -> impl Future<Output = Result<Vec<MatrixElement>>> + Send;
}

/// Distance matrix in batches of at most `chunk_size` destinations
///
/// Per-chunk results are concatenated in destination order.
pub async fn chunked_distance_matrix<R: Router>(
    router: &R,
    origin: &Waypoint,
    destinations: &[Waypoint],
    mode: TravelMode,
    chunk_size: usize,
) -> Result<Vec<MatrixElement>> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk size must be positive".into()));
    }
    let mut elements = Vec::with_capacity(destinations.len());
    for chunk in destinations.chunks(chunk_size) {
        let batch = router.distance_matrix(origin, chunk, mode).await?;
        if batch.len() != chunk.len() {
            return Err(Error::HttpError(format!(
                "distance matrix returned {} elements for {} destinations",
                batch.len(),
                chunk.len()
            )));
        }
        elements.extend(batch);
    }
    Ok(elements)
}
