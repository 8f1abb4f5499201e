//! Run-level record of absorbed failures

use std::collections::BTreeMap;
use std::fmt;

use log::info;
use serde::Serialize;

/// Non-fatal failure kinds kept for the end-of-run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FailureKind {
    LowConfidenceMatch,
    RouteUnavailable,
    CrossingNotDetected,
    DegenerateScore,
    ClampedAttractiveness,
    MissingData,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::LowConfidenceMatch => "LowConfidenceMatch",
            FailureKind::RouteUnavailable => "RouteUnavailable",
            FailureKind::CrossingNotDetected => "CrossingNotDetected",
            FailureKind::DegenerateScore => "DegenerateScore",
            FailureKind::ClampedAttractiveness => "ClampedAttractiveness",
            FailureKind::MissingData => "MissingData",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    /// Origin city, when the failure belongs to one
    pub origin: Option<String>,
    /// Candidate destination, table or country the failure concerns
    pub candidate: Option<String>,
    pub detail: String,
}

/// Append-only list of absorbed failures
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureLog {
    records: Vec<FailureRecord>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        kind: FailureKind,
        origin: Option<&str>,
        candidate: Option<&str>,
        detail: impl Into<String>,
    ) {
        self.records.push(FailureRecord {
            kind,
            origin: origin.map(str::to_string),
            candidate: candidate.map(str::to_string),
            detail: detail.into(),
        });
    }

    pub fn extend(&mut self, other: FailureLog) {
        self.records.extend(other.records);
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, kind: FailureKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    /// Record count per kind, in kind order
    pub fn counts(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Log the per-kind counts at info level
    pub fn log_summary(&self) {
        if self.records.is_empty() {
            info!("No failures recorded");
            return;
        }
        for (kind, count) in self.counts() {
            info!("{kind}: {count}");
        }
    }
}
