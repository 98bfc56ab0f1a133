use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info};

use crate::ranges::RangeEntry;
use crate::reconcile::{EntryCoverage, EntryError};

/// Outcome of one range entry.
#[derive(Debug)]
pub struct EntryReport {
    pub entry: RangeEntry,
    pub outcome: Result<EntryCoverage, EntryError>,
}

/// Per-entry outcomes of a whole run.
#[derive(Debug)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub entries: Vec<EntryReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|r| r.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntryError> {
        self.entries.iter().filter_map(|r| r.outcome.as_ref().err())
    }

    /// One line per entry, then the totals.
    pub fn log(&self) {
        for r in &self.entries {
            match &r.outcome {
                Ok(c) => info!(
                    first = %c.first,
                    expected = %c.expected_last,
                    covered = %format!("{}-{}", c.covered_first, c.covered_last),
                    fetches = c.fetches,
                    "reconciled"
                ),
                Err(e) => error!(
                    first = %r.entry.first,
                    expected = %r.entry.expected_last,
                    step = %e.step,
                    error = %error_chain(e),
                    "failed"
                ),
            }
        }
        info!(
            started_at = %self.started_at.to_rfc3339(),
            elapsed = ?self.elapsed,
            succeeded = self.succeeded(),
            failed = self.failed(),
            "run finished"
        );
    }
}

/// `outer: inner: root` rendering of an error and its sources.
pub fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut cur = e.source();
    while let Some(s) = cur {
        out.push_str(": ");
        out.push_str(&s.to_string());
        cur = s.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::testing::{code, entry};
    use crate::reconcile::{ReconcileError, Step};
    use std::path::PathBuf;

    fn summary() -> RunSummary {
        let ok = entry("00100", "00199");
        let bad = entry("00200", "00299");
        RunSummary {
            started_at: Utc::now(),
            elapsed: Duration::from_millis(5),
            entries: vec![
                EntryReport {
                    entry: ok,
                    outcome: Ok(EntryCoverage {
                        first: ok.first,
                        expected_last: ok.expected_last,
                        covered_first: ok.first,
                        covered_last: code("00199"),
                        fetches: 1,
                        files: vec![PathBuf::from("001.xls")],
                    }),
                },
                EntryReport {
                    entry: bad,
                    outcome: Err(EntryError {
                        first: bad.first,
                        step: Step::GapFill { fetch: 3 },
                        source: ReconcileError::NoProgress {
                            previous: code("00250"),
                            last: code("00250"),
                            expected: code("00299"),
                        },
                    }),
                },
            ],
        }
    }

    #[test]
    fn counts_successes_and_failures() {
        let s = summary();
        assert_eq!(s.succeeded(), 1);
        assert_eq!(s.failed(), 1);
        assert!(!s.is_success());
        assert_eq!(s.failures().count(), 1);
    }

    #[test]
    fn chain_names_entry_step_and_cause() {
        let s = summary();
        let err = s.failures().next().unwrap();
        let text = error_chain(err);
        assert!(text.starts_with("entry 00200: gap-fill fetch #3 failed: no progress"), "{text}");
        assert!(text.contains("00250"));
    }
}
