//! Common utilities for the haven toolkit

pub mod error;
pub mod fuzzy;

pub use error::{Error, Result};
pub use fuzzy::{ratio, resolve, resolve_with, token_set_ratio, Match, MatchPolicy, Resolution};

#[cfg(test)]
mod tests {
    use crate::fuzzy::suggest_country;

    #[test]
    fn suggest_country_returns_expected_country() {
        let known = vec!["Ukraine".to_string(), "Moldova".to_string()];
        assert_eq!(suggest_country("Ukrane", &known), Some("Ukraine".to_string()));
    }
}
