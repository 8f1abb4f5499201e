//! HTTP router client for a Google-Directions-compatible API
//!
//! Talks to `{base_url}/directions/json` and `{base_url}/distancematrix/json`
//! through one process-wide connection pool, retrying transient failures
//! with exponential backoff.

use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use haven_common::{Error, Result};

use crate::core::config::{RouterConfig, TravelMode};
use crate::core::router::{CandidateRoute, LatLng, MatrixElement, RouteStep, Router, Waypoint};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Longest wait between two attempts
const MAX_RETRY_DELAY_MS: u64 = 60_000;

fn client_builder(connect_timeout_secs: u64) -> ClientBuilder {
    ClientBuilder::new()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(20)
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .user_agent(format!("haven-route/{}", env!("HAVEN_VERSION")))
}

/// Global HTTP client shared by every router instance
static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(|| {
    client_builder(DEFAULT_CONNECT_TIMEOUT_SECS)
        .build()
        .expect("Failed to create HTTP client")
});

/// Delay before retry number `attempt` (1-based), doubling up to [`MAX_RETRY_DELAY_MS`]
fn backoff_delay_ms(base_delay_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS)
}

/// Run `operation` again on retryable errors, doubling the delay each time
async fn retry_with_backoff<F, Fut, T>(max_retries: u32, base_delay_ms: u64, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = backoff_delay_ms(base_delay_ms, attempt);
                warn!("{e} (attempt {attempt}), retrying in {delay}ms");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Throttling and server errors are transient, so they come back as
/// network errors and get retried; other failures are final.
fn status_error(endpoint: &str, status: StatusCode) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::NetworkError(format!("{endpoint} returned {status}"))
    } else if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        Error::HttpError(format!("{endpoint} returned {status}; check the router API key"))
    } else {
        Error::HttpError(format!("{endpoint} returned {status}"))
    }
}

#[derive(Debug, Deserialize)]
struct ValueJson {
    value: f64,
}

#[derive(Debug, Deserialize)]
struct LatLngJson {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct PolylineJson {
    points: String,
}

#[derive(Debug, Deserialize)]
struct StepJson {
    #[serde(default)]
    html_instructions: String,
    duration: ValueJson,
    distance: ValueJson,
    end_location: LatLngJson,
    #[serde(default)]
    polyline: Option<PolylineJson>,
}

#[derive(Debug, Deserialize)]
struct LegJson {
    #[serde(default)]
    steps: Vec<StepJson>,
}

#[derive(Debug, Deserialize)]
struct RouteJson {
    #[serde(default)]
    legs: Vec<LegJson>,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<RouteJson>,
}

#[derive(Debug, Deserialize)]
struct ElementJson {
    status: String,
    #[serde(default)]
    duration: Option<ValueJson>,
    #[serde(default)]
    distance: Option<ValueJson>,
}

#[derive(Debug, Deserialize)]
struct RowJson {
    #[serde(default)]
    elements: Vec<ElementJson>,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    rows: Vec<RowJson>,
}

/// Provider status of a whole response
enum ResponseStatus {
    Ok,
    NoResult,
}

fn check_status(endpoint: &str, status: &str, message: Option<&str>) -> Result<ResponseStatus> {
    match status {
        "OK" => Ok(ResponseStatus::Ok),
        "ZERO_RESULTS" | "NOT_FOUND" => Ok(ResponseStatus::NoResult),
        // Quota and provider-side hiccups arrive with HTTP 200
        "OVER_QUERY_LIMIT" | "UNKNOWN_ERROR" => Err(Error::NetworkError(format!(
            "{endpoint} status {status}: {}",
            message.unwrap_or("no message")
        ))),
        other => Err(Error::HttpError(format!(
            "{endpoint} status {other}: {}",
            message.unwrap_or("no message")
        ))),
    }
}

impl From<StepJson> for RouteStep {
    fn from(step: StepJson) -> Self {
        RouteStep {
            instructions: step.html_instructions,
            duration_s: step.duration.value,
            distance_m: step.distance.value,
            end_location: LatLng::new(step.end_location.lat, step.end_location.lng),
            polyline: step.polyline.map(|p| p.points).unwrap_or_default(),
        }
    }
}

fn parse_directions(response: DirectionsResponse) -> Result<Option<CandidateRoute>> {
    match check_status("directions", &response.status, response.error_message.as_deref())? {
        ResponseStatus::NoResult => Ok(None),
        ResponseStatus::Ok => {
            let leg = response
                .routes
                .into_iter()
                .next()
                .and_then(|route| route.legs.into_iter().next());
            Ok(leg.map(|leg| CandidateRoute {
                steps: leg.steps.into_iter().map(RouteStep::from).collect(),
            }))
        }
    }
}

fn parse_matrix(response: MatrixResponse, expected: usize) -> Result<Vec<MatrixElement>> {
    match check_status("distance matrix", &response.status, response.error_message.as_deref())? {
        ResponseStatus::NoResult => Ok((0..expected)
            .map(|_| MatrixElement::unavailable(&response.status))
            .collect()),
        ResponseStatus::Ok => {
            let row = response.rows.into_iter().next().ok_or_else(|| {
                Error::HttpError("distance matrix response has no rows".into())
            })?;
            Ok(row
                .elements
                .into_iter()
                .map(|e| MatrixElement {
                    status: e.status,
                    duration_s: e.duration.map(|d| d.value),
                    distance_m: e.distance.map(|d| d.value),
                })
                .collect())
        }
    }
}

/// Router backed by the directions and distance-matrix HTTP endpoints
#[derive(Debug, Clone)]
pub struct DirectionsClient {
    client: Client,
    config: RouterConfig,
}

impl DirectionsClient {
    pub fn new(config: RouterConfig) -> Result<Self> {
        let client = if config.connect_timeout_secs == DEFAULT_CONNECT_TIMEOUT_SECS {
            GLOBAL_CLIENT.clone()
        } else {
            client_builder(config.connect_timeout_secs).build()?
        };
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}/json", self.config.base_url.trim_end_matches('/'))
    }

    async fn get_once<T: DeserializeOwned>(&self, name: &str, params: &[(&str, String)]) -> Result<T> {
        let mut request = self
            .client
            .get(self.endpoint(name))
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .query(params);
        if let Some(key) = &self.config.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(name, status));
        }
        Ok(response.json::<T>().await?)
    }

    /// Fetch and parse with retries; a retryable provider status retries the request
    async fn fetch<T, U, P>(&self, name: &str, params: &[(&str, String)], parse: P) -> Result<U>
    where
        T: DeserializeOwned,
        P: Fn(T) -> Result<U> + Sync,
    {
        let parse = &parse;
        retry_with_backoff(
            self.config.max_retries,
            self.config.base_retry_delay_ms,
            move || async move { parse(self.get_once::<T>(name, params).await?) },
        )
        .await
    }
}

impl Router for DirectionsClient {
    async fn route(
        &self,
        origin: &Waypoint,
        destination: &Waypoint,
        mode: TravelMode,
    ) -> Result<Option<CandidateRoute>> {
        debug!("Directions {origin} -> {destination} ({mode})");
        let params = [
            ("origin", origin.to_string()),
            ("destination", destination.to_string()),
            ("mode", mode.as_str().to_string()),
        ];
        self.fetch("directions", &params, parse_directions).await
    }

    async fn distance_matrix(
        &self,
        origin: &Waypoint,
        destinations: &[Waypoint],
        mode: TravelMode,
    ) -> Result<Vec<MatrixElement>> {
        if destinations.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Distance matrix {origin} -> {} destinations ({mode})", destinations.len());
        let joined = destinations
            .iter()
            .map(Waypoint::to_string)
            .collect::<Vec<_>>()
            .join("|");
        let params = [
            ("origins", origin.to_string()),
            ("destinations", joined),
            ("mode", mode.as_str().to_string()),
        ];
        let expected = destinations.len();
        self.fetch("distancematrix", &params, |response: MatrixResponse| {
            parse_matrix(response, expected)
        })
        .await
    }
}
