//! Fuzzy name resolution across independently sourced tables
//!
//! Place and country names never agree across datasets ("Moldova" vs
//! "Moldova, Republic of"), so every join goes through [`resolve`]. Scores
//! are integers in `0..=100`, token-set based: word order, punctuation and
//! duplicate words do not matter.
//!
//! Call sites pick a [`MatchPolicy`] explicitly. Destructive decisions
//! (removing a country from a run) use [`MatchPolicy::RequireAtLeast`];
//! joins use [`MatchPolicy::AcceptBest`], which always keeps the best
//! candidate but flags weak matches so they can be logged and recorded.

use std::collections::BTreeSet;

use log::warn;
use strsim::{jaro_winkler, normalized_levenshtein};

use crate::error::{Error, Result};

/// Best candidate for a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// The candidate string, as given
    pub matched: String,
    /// Similarity in `0..=100`
    pub score: u8,
    /// Position of the candidate in the input sequence
    pub index: usize,
}

/// Confidence policy a call site applies to a resolved match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Keep the best candidate whatever its score; scores below the bar are flagged
    AcceptBest { warn_below: u8 },
    /// Keep the best candidate only when it scores at least this much
    RequireAtLeast(u8),
}

/// Outcome of applying a [`MatchPolicy`] to the best candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Confident(Match),
    /// Accepted, but below the policy's quality bar
    LowConfidence(Match),
    /// Below a hard threshold; the caller must not act on it
    Rejected(Match),
}

impl Resolution {
    /// The match, if the policy allows acting on it
    pub fn accepted(&self) -> Option<&Match> {
        match self {
            Resolution::Confident(m) | Resolution::LowConfidence(m) => Some(m),
            Resolution::Rejected(_) => None,
        }
    }

    /// The best candidate regardless of the policy outcome
    pub fn best(&self) -> &Match {
        match self {
            Resolution::Confident(m) | Resolution::LowConfidence(m) | Resolution::Rejected(m) => m,
        }
    }

    pub fn is_confident(&self) -> bool {
        matches!(self, Resolution::Confident(_))
    }
}

/// Lowercase, replace anything non-alphanumeric with a space, collapse whitespace
fn normalize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_percent(similarity: f64) -> u8 {
    (similarity * 100.0).round().clamp(0.0, 100.0) as u8
}

fn raw_ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    to_percent(normalized_levenshtein(a, b))
}

/// Whole-string similarity after normalization, `0..=100`
///
/// Empty inputs score 0 rather than 100: an empty string never identifies anything.
pub fn ratio(a: &str, b: &str) -> u8 {
    raw_ratio(&normalize(a), &normalize(b))
}

/// Order- and duplicate-insensitive overlap similarity, `0..=100`
///
/// Compares the sorted token intersection against each side's intersection
/// plus remainder, and the two remainders against each other; the best of
/// the three wins. A query whose tokens are a subset of the candidate's
/// scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let a = normalize(a);
    let b = normalize(b);
    let tokens_a: BTreeSet<&str> = a.split(' ').filter(|t| !t.is_empty()).collect();
    let tokens_b: BTreeSet<&str> = b.split(' ').filter(|t| !t.is_empty()).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0;
    }

    let join = |set: Vec<&str>| set.join(" ");
    let intersection = join(tokens_a.intersection(&tokens_b).copied().collect());
    let diff_ab = join(tokens_a.difference(&tokens_b).copied().collect());
    let diff_ba = join(tokens_b.difference(&tokens_a).copied().collect());

    let combined_ab = format!("{intersection} {diff_ab}").trim().to_string();
    let combined_ba = format!("{intersection} {diff_ba}").trim().to_string();

    let mut best = raw_ratio(&combined_ab, &combined_ba);
    if !intersection.is_empty() {
        best = best
            .max(raw_ratio(&intersection, &combined_ab))
            .max(raw_ratio(&intersection, &combined_ba));
    }
    best
}

/// Highest-scoring candidate for `query` by [`token_set_ratio`]
///
/// Ties go to the earliest candidate. An empty candidate list is a
/// [`Error::ResolutionFailure`], never a guess.
pub fn resolve<S: AsRef<str>>(query: &str, candidates: &[S]) -> Result<Match> {
    let mut best: Option<Match> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let candidate = candidate.as_ref();
        let score = token_set_ratio(query, candidate);
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(Match {
                matched: candidate.to_string(),
                score,
                index,
            });
            if score == 100 {
                break;
            }
        }
    }

    best.ok_or_else(|| Error::ResolutionFailure {
        query: query.to_string(),
        context: "empty candidate list".to_string(),
    })
}

/// [`resolve`] plus an explicit confidence policy
///
/// `context` names the table being joined; it appears in logs and errors.
/// Weak matches are logged at warn level because an accepted bad match
/// silently corrupts every downstream join.
pub fn resolve_with<S: AsRef<str>>(
    query: &str,
    candidates: &[S],
    policy: MatchPolicy,
    context: &str,
) -> Result<Resolution> {
    let found = resolve(query, candidates).map_err(|_| Error::ResolutionFailure {
        query: query.to_string(),
        context: context.to_string(),
    })?;

    let resolution = match policy {
        MatchPolicy::AcceptBest { warn_below } if found.score < warn_below => {
            warn!(
                "Low-confidence match in {context}: '{query}' -> '{}' (score {})",
                found.matched, found.score
            );
            Resolution::LowConfidence(found)
        }
        MatchPolicy::AcceptBest { .. } => Resolution::Confident(found),
        MatchPolicy::RequireAtLeast(threshold) if found.score < threshold => {
            warn!(
                "Rejected match in {context}: '{query}' -> '{}' (score {} < {threshold})",
                found.matched, found.score
            );
            Resolution::Rejected(found)
        }
        MatchPolicy::RequireAtLeast(_) => Resolution::Confident(found),
    };

    Ok(resolution)
}

/// Suggest a known country for a probably misspelled one
///
/// Blends Jaro-Winkler (70%) with normalized Levenshtein (30%) plus a
/// prefix bonus, and answers only above 0.65. Returns `None` when the
/// input already names a known country.
pub fn suggest_country(input: &str, known: &[String]) -> Option<String> {
    if known.iter().any(|k| k.eq_ignore_ascii_case(input)) {
        return None;
    }

    let input_lower = input.to_lowercase();
    let min_threshold = 0.65;
    let mut best_match = None;
    let mut best_score = 0.0f64;

    for candidate in known {
        let candidate_lower = candidate.to_lowercase();
        let combined = jaro_winkler(&input_lower, &candidate_lower) * 0.7
            + normalized_levenshtein(&input_lower, &candidate_lower) * 0.3;

        // Typos rarely touch the first few letters of a country name
        let mut bonus = 0.0;
        let prefix_len = input_lower.chars().count().min(7);
        if prefix_len >= 4 {
            let input_prefix: String = input_lower.chars().take(prefix_len).collect();
            let candidate_prefix: String = candidate_lower.chars().take(prefix_len).collect();
            let prefix_similarity = normalized_levenshtein(&input_prefix, &candidate_prefix);
            if prefix_similarity > 0.7 {
                bonus += 0.2 * prefix_similarity;
            }
        }

        let score = combined + bonus;
        if score >= min_threshold && score > best_score {
            best_score = score;
            best_match = Some(candidate.clone());
        }
    }

    best_match
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  Moldova, Republic of "), "moldova republic of");
        assert_eq!(normalize("Côte d'Ivoire"), "côte d ivoire");
    }

    #[test]
    fn test_token_set_ratio_ignores_order_and_duplicates() {
        assert_eq!(token_set_ratio("Republic of Moldova", "Moldova, Republic of"), 100);
        assert_eq!(token_set_ratio("poland poland", "Poland"), 100);
        assert_eq!(token_set_ratio("Moldova", "Republic of Moldova"), 100);
    }

    #[test]
    fn test_token_set_ratio_disjoint_and_empty() {
        assert_eq!(token_set_ratio("", "Poland"), 0);
        assert_eq!(token_set_ratio("Poland", "   "), 0);
        assert!(token_set_ratio("Poland", "Hungary") < 50);
    }

    #[test]
    fn test_ratio_exact_and_typo() {
        assert_eq!(ratio("Moldova", "moldova"), 100);
        // one substitution in seven characters
        assert_eq!(ratio("Romenia", "Romania"), 86);
        assert_eq!(ratio("", ""), 0);
    }

    #[test]
    fn test_resolve_picks_best_and_reports_index() {
        let candidates = ["Hungary", "Poland", "Slovak Republic", "Romania"];
        let m = resolve("Slovakia Republic", &candidates).unwrap();
        assert_eq!(m.matched, "Slovak Republic");
        assert_eq!(m.index, 2);
        assert!(m.score <= 100);
    }

    #[test]
    fn test_resolve_ties_go_to_first_occurrence() {
        let candidates = ["Poland", "Hungary", "Poland"];
        let m = resolve("poland", &candidates).unwrap();
        assert_eq!(m.index, 0);

        let candidates = ["Belarus", "Russia"];
        let m = resolve("zzz", &candidates).unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(m.score, 0);
    }

    #[test]
    fn test_resolve_empty_candidates_fails() {
        let candidates: [&str; 0] = [];
        let err = resolve("Poland", &candidates).unwrap_err();
        assert!(matches!(err, Error::ResolutionFailure { .. }));
    }

    #[test]
    fn test_resolve_bounds_over_many_queries() {
        let candidates = ["Ukraine", "Moldova", "Romania", "Hungary", "Slovakia", "Poland", "Belarus"];
        for query in ["ukr", "Moldavia", "", "Russian Federation", "poland!", "Slovak Rep."] {
            let m = resolve(query, &candidates).unwrap();
            assert!(m.index < candidates.len());
            assert!(m.score <= 100);
            assert_eq!(m.matched, candidates[m.index]);
        }
    }

    #[test]
    fn test_resolve_with_policies() {
        let candidates = ["Hungary", "Poland", "Romania"];

        let strict = resolve_with("Polska", &candidates, MatchPolicy::RequireAtLeast(90), "test").unwrap();
        assert!(matches!(strict, Resolution::Rejected(_)));
        assert!(strict.accepted().is_none());

        let soft = resolve_with("Polska", &candidates, MatchPolicy::AcceptBest { warn_below: 90 }, "test").unwrap();
        assert!(matches!(soft, Resolution::LowConfidence(_)));
        assert!(soft.accepted().is_some());

        let exact = resolve_with("poland", &candidates, MatchPolicy::RequireAtLeast(90), "test").unwrap();
        assert!(exact.is_confident());
        assert_eq!(exact.best().matched, "Poland");
    }

    #[test]
    fn test_resolve_with_empty_names_context() {
        let candidates: Vec<String> = Vec::new();
        let err = resolve_with("Poland", &candidates, MatchPolicy::AcceptBest { warn_below: 80 }, "GDP table")
            .unwrap_err();
        assert!(err.to_string().contains("GDP table"));
    }

    #[test]
    fn test_suggest_country() {
        let known = vec![
            "Ukraine".to_string(),
            "Syria".to_string(),
            "Afghanistan".to_string(),
        ];
        assert_eq!(suggest_country("Afganistan", &known), Some("Afghanistan".to_string()));
        assert_eq!(suggest_country("ukraine", &known), None);
        assert_eq!(suggest_country("qqqqqqqqqqqq", &known), None);
    }
}
