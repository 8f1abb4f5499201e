//! Core library modules for haven-route
//!
//! Reference tables and the country set feed the exit-route selector, which
//! drives the router, the crossing detector and the scorer.

pub mod config;
pub mod countries;
pub mod crossing;
pub mod directions;
pub mod failures;
pub mod model;
pub mod nearby;
pub mod report;
pub mod router;
pub mod scoring;
pub mod selector;
pub mod tables;

// Re-export main types for internal use
pub use config::{RunConfig, TravelMode};
pub use countries::{BorderCountry, CountrySet};
pub use directions::DirectionsClient;
pub use failures::{FailureKind, FailureLog};
pub use router::Router;
pub use selector::{ExitAssignment, ExitRouteSelector, SelectionReport};
