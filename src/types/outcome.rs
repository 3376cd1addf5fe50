//! Per-candidate outcomes and the end-of-run report.
//!
//! The report is computed once, by set arithmetic over the eligible set,
//! after every candidate has finished.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Terminal state of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CandidateOutcome {
    /// Bundle assembled and written.
    Bundled,
    /// Mandatory lookups succeeded but the bundle was not produced.
    RefreshedNotBundled,
    /// Processing itself failed.
    Failed,
}

impl fmt::Display for CandidateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundled => write!(f, "BUNDLED"),
            Self::RefreshedNotBundled => write!(f, "REFRESHED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Outcome report over the requested candidates.
///
/// The three partitions are pairwise disjoint and their union equals the
/// eligible set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// Candidates that reached terminal success.
    pub bundled: BTreeSet<String>,
    /// Candidates processed upstream but not bundled.
    pub refreshed_not_bundled: BTreeSet<String>,
    /// Everything else in the eligible set.
    pub failed: BTreeSet<String>,
    /// Failure details keyed by candidate name (identities that blocked it).
    pub details: BTreeMap<String, Vec<String>>,
}

impl OutcomeReport {
    /// Compute the partition.
    ///
    /// - `bundled` = `bundled ∩ eligible`
    /// - `refreshed_not_bundled` = `(eligible ∩ processed) − bundled`
    /// - `failed` = `eligible − bundled − refreshed_not_bundled`
    pub fn compute(
        eligible: &BTreeSet<String>,
        processed: &BTreeSet<String>,
        bundled: &BTreeSet<String>,
    ) -> Self {
        let bundled: BTreeSet<String> = eligible.intersection(bundled).cloned().collect();

        let refreshed_not_bundled: BTreeSet<String> = eligible
            .intersection(processed)
            .filter(|name| !bundled.contains(*name))
            .cloned()
            .collect();

        let failed: BTreeSet<String> = eligible
            .iter()
            .filter(|name| !bundled.contains(*name) && !refreshed_not_bundled.contains(*name))
            .cloned()
            .collect();

        Self {
            bundled,
            refreshed_not_bundled,
            failed,
            details: BTreeMap::new(),
        }
    }

    /// Attach failure details.
    pub fn with_details(mut self, details: BTreeMap<String, Vec<String>>) -> Self {
        self.details = details;
        self
    }

    /// Partition a candidate landed in, if it was eligible.
    pub fn outcome_of(&self, name: &str) -> Option<CandidateOutcome> {
        if self.bundled.contains(name) {
            Some(CandidateOutcome::Bundled)
        } else if self.refreshed_not_bundled.contains(name) {
            Some(CandidateOutcome::RefreshedNotBundled)
        } else if self.failed.contains(name) {
            Some(CandidateOutcome::Failed)
        } else {
            None
        }
    }

    /// Total number of candidates in the report.
    pub fn total(&self) -> usize {
        self.bundled.len() + self.refreshed_not_bundled.len() + self.failed.len()
    }

    /// Check whether every candidate was bundled.
    pub fn all_bundled(&self) -> bool {
        self.refreshed_not_bundled.is_empty() && self.failed.is_empty()
    }

    fn render_section(
        &self,
        f: &mut fmt::Formatter<'_>,
        heading: &str,
        names: &BTreeSet<String>,
        outcome: CandidateOutcome,
    ) -> fmt::Result {
        writeln!(f, "{} {}", names.len(), heading)?;
        for name in names {
            writeln!(f, "     {} {}", name, outcome)?;
            if let Some(details) = self.details.get(name) {
                for detail in details {
                    writeln!(f, "         - {}", detail)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for OutcomeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render_section(f, "Measures successfully bundled:", &self.bundled, CandidateOutcome::Bundled)?;
        self.render_section(
            f,
            "Measures refreshed, but not bundled (due to issues):",
            &self.refreshed_not_bundled,
            CandidateOutcome::RefreshedNotBundled,
        )?;
        self.render_section(f, "Measures failed refresh:", &self.failed, CandidateOutcome::Failed)
    }
}
