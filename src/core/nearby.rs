//! Haven-city search around a disaster point
//!
//! Cities between the disaster radius and the flight radius are candidate
//! havens. The most populous `candidates` of them are kept; the router can
//! then order those by travel time and keep the `limit` fastest.

use std::cmp::Ordering;

use geo::HaversineDistance;
use geo::Point;
use log::{debug, info};
use serde::Serialize;

use haven_common::{Error, Result};

use crate::core::config::TravelMode;
use crate::core::router::{chunked_distance_matrix, LatLng, Router, Waypoint};
use crate::core::tables::{City, Gazetteer};

/// Distance-matrix batch size for haven ranking
pub const HAVEN_MATRIX_CHUNK: usize = 20;

/// Populated-place feature code too small to count as a haven
const MINOR_PLACE_CODE: &str = "PPL";

pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let p1 = Point::new(a.lng, a.lat);
    let p2 = Point::new(b.lng, b.lat);
    p1.haversine_distance(&p2) / 1000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyQuery {
    pub start: LatLng,
    /// Cities this close are inside the disaster area
    pub disaster_radius_km: f64,
    /// Cities further away are out of reach
    pub flight_radius_km: f64,
    /// Most populous ring cities considered at all
    pub candidates: usize,
    /// Havens returned after ranking
    pub limit: usize,
}

impl NearbyQuery {
    pub fn new(start: LatLng, disaster_radius_km: f64, flight_radius_km: f64) -> Self {
        Self {
            start,
            disaster_radius_km,
            flight_radius_km,
            candidates: 60,
            limit: 20,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.candidates == 0 || self.limit == 0 {
            return Err(Error::InvalidInput(
                "candidate count and limit must be at least 1".into(),
            ));
        }
        if self.disaster_radius_km.is_nan() || self.disaster_radius_km < 0.0 {
            return Err(Error::InvalidInput(format!(
                "disaster radius {} must be non-negative",
                self.disaster_radius_km
            )));
        }
        if self.flight_radius_km.is_nan() || self.flight_radius_km <= self.disaster_radius_km {
            return Err(Error::InvalidInput(format!(
                "flight radius {} must exceed disaster radius {}",
                self.flight_radius_km, self.disaster_radius_km
            )));
        }
        if !(-90.0..=90.0).contains(&self.start.lat) || !(-180.0..=180.0).contains(&self.start.lng) {
            return Err(Error::InvalidInput(format!(
                "start point {},{} is not a coordinate",
                self.start.lat, self.start.lng
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HavenCity {
    pub city: City,
    pub distance_km: f64,
    /// Filled in by [`rank_by_travel_time`]; `None` when unreachable
    pub travel_time_s: Option<f64>,
}

/// The `candidates` most populous gazetteer cities in the `(disaster, flight]` ring
pub fn find_haven_cities(gazetteer: &Gazetteer, query: &NearbyQuery) -> Result<Vec<HavenCity>> {
    query.validate()?;

    let mut havens: Vec<HavenCity> = gazetteer
        .cities()
        .iter()
        .filter(|city| city.feature_code != MINOR_PLACE_CODE)
        .filter_map(|city| {
            let distance_km = haversine_km(query.start, LatLng::new(city.latitude, city.longitude));
            (distance_km > query.disaster_radius_km && distance_km <= query.flight_radius_km).then(
                || HavenCity {
                    city: city.clone(),
                    distance_km,
                    travel_time_s: None,
                },
            )
        })
        .collect();

    havens.sort_by(|a, b| b.city.population.cmp(&a.city.population));
    havens.truncate(query.candidates);
    debug!(
        "{} haven cities between {} and {} km",
        havens.len(),
        query.disaster_radius_km,
        query.flight_radius_km
    );
    Ok(havens)
}

/// Order havens by travel time from the query start and keep the `limit` fastest
///
/// Unreachable havens sort after every reachable one.
pub async fn rank_by_travel_time<R: Router>(
    router: &R,
    query: &NearbyQuery,
    mut havens: Vec<HavenCity>,
    mode: TravelMode,
) -> Result<Vec<HavenCity>> {
    let start = query.start;
    let destinations: Vec<Waypoint> = havens
        .iter()
        .map(|h| Waypoint::Point(LatLng::new(h.city.latitude, h.city.longitude)))
        .collect();
    let elements = chunked_distance_matrix(
        router,
        &Waypoint::Point(start),
        &destinations,
        mode,
        HAVEN_MATRIX_CHUNK,
    )
    .await?;

    for (haven, element) in havens.iter_mut().zip(&elements) {
        haven.travel_time_s = element.usable().map(|(duration, _)| duration);
    }
    havens.sort_by(|a, b| match (a.travel_time_s, b.travel_time_s) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let reachable = havens.iter().filter(|h| h.travel_time_s.is_some()).count();
    info!("{reachable} of {} haven cities reachable by {mode}", havens.len());
    havens.truncate(query.limit);
    Ok(havens)
}
