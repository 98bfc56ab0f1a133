// src/reconcile/mod.rs

use std::{fmt, path::PathBuf};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::codes::ZipCode;
use crate::coverage::{CoverageExtractor, CoverageRange, ExtractError};
use crate::fetch::{FetchError, Fetcher, ResourceHandle};
use crate::ranges::{RangeEntry, RangeMap};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("fetching {code} failed")]
    Fetch {
        code: ZipCode,
        #[source]
        source: FetchError,
    },
    #[error("reading coverage from {path:?} failed")]
    Extract {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },
    #[error("no progress: coverage ended at {last} again (previous {previous}, expected {expected})")]
    NoProgress {
        previous: ZipCode,
        last: ZipCode,
        expected: ZipCode,
    },
    #[error("gave up after {fetches} fetches with coverage at {last} (expected {expected})")]
    FetchLimit {
        fetches: u32,
        last: ZipCode,
        expected: ZipCode,
    },
    #[error("no postal code after {0}")]
    CodeOverflow(ZipCode),
    #[error("run deadline passed")]
    DeadlineExceeded,
}

/// Where in an entry's reconciliation a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    InitialFetch,
    /// Reading coverage after the n-th fetch (1-based).
    Extract { fetch: u32 },
    /// Preparing or issuing the n-th fetch (1-based, n > 1).
    GapFill { fetch: u32 },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::InitialFetch => f.write_str("initial fetch"),
            Step::Extract { fetch } => write!(f, "coverage of fetch #{}", fetch),
            Step::GapFill { fetch } => write!(f, "gap-fill fetch #{}", fetch),
        }
    }
}

/// A failed entry: its key, the step, and why.
#[derive(Debug, Error)]
#[error("entry {first}: {step} failed")]
pub struct EntryError {
    pub first: ZipCode,
    pub step: Step,
    #[source]
    pub source: ReconcileError,
}

/// Result of a fully reconciled entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCoverage {
    pub first: ZipCode,
    pub expected_last: ZipCode,
    /// First code declared by the initial file.
    pub covered_first: ZipCode,
    /// Last code declared by the final file; `>= expected_last`.
    pub covered_last: ZipCode,
    pub fetches: u32,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_fetches_per_entry: u32,
    pub deadline: Option<Instant>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_fetches_per_entry: 64,
            deadline: None,
        }
    }
}

/// Drives one range entry at a time: fetch, read coverage, and keep fetching
/// from one past the covered end until the expected last code is reached.
pub struct Reconciler<'a, F, X> {
    fetcher: &'a F,
    extractor: &'a X,
    limits: Limits,
}

impl<'a, F: Fetcher, X: CoverageExtractor> Reconciler<'a, F, X> {
    pub fn new(fetcher: &'a F, extractor: &'a X, limits: Limits) -> Self {
        Self {
            fetcher,
            extractor,
            limits,
        }
    }

    fn check_deadline(&self) -> Result<(), ReconcileError> {
        match self.limits.deadline {
            Some(d) if Instant::now() >= d => Err(ReconcileError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Issue the first fetch for `entry`.
    pub async fn initial_fetch(&self, entry: &RangeEntry) -> Result<ResourceHandle, EntryError> {
        let fail = |source| EntryError {
            first: entry.first,
            step: Step::InitialFetch,
            source,
        };
        self.check_deadline().map_err(fail)?;
        self.fetcher
            .fetch(&entry.first)
            .await
            .map_err(|source| {
                fail(ReconcileError::Fetch {
                    code: entry.first,
                    source,
                })
            })
    }

    /// Reconcile one entry end to end.
    #[instrument(level = "info", skip(self, entry), fields(first = %entry.first, expected = %entry.expected_last))]
    pub async fn reconcile_entry(&self, entry: &RangeEntry) -> Result<EntryCoverage, EntryError> {
        let handle = self.initial_fetch(entry).await?;
        self.fill_gaps(entry, handle).await
    }

    /// Continue an entry whose initial fetch already produced `handle`:
    /// read its coverage and fetch onward until the expected range is covered.
    ///
    /// Each fetch depends on the coverage read from the previous one, so the
    /// loop is strictly sequential.
    pub async fn fill_gaps(
        &self,
        entry: &RangeEntry,
        handle: ResourceHandle,
    ) -> Result<EntryCoverage, EntryError> {
        let expected = entry.expected_last;
        let fail = |step, source| EntryError {
            first: entry.first,
            step,
            source,
        };

        let mut fetches = 1u32;
        let mut files = vec![handle.path.clone()];
        let initial = self
            .extract(&handle)
            .map_err(|e| fail(Step::Extract { fetch: fetches }, e))?;
        let covered_first = initial.first;
        let mut last = initial.last;
        if covered_first != entry.first {
            debug!(first = %entry.first, declared = %covered_first, "file starts at a different code");
        }

        while last < expected {
            let step = Step::GapFill { fetch: fetches + 1 };
            if fetches >= self.limits.max_fetches_per_entry {
                return Err(fail(
                    step,
                    ReconcileError::FetchLimit {
                        fetches,
                        last,
                        expected,
                    },
                ));
            }
            let next = last
                .next()
                .ok_or_else(|| fail(step, ReconcileError::CodeOverflow(last)))?;
            self.check_deadline().map_err(|e| fail(step, e))?;

            info!(covered = %last, expected = %expected, next = %next, "coverage short, fetching next file");
            let handle = self.fetcher.fetch(&next).await.map_err(|source| {
                fail(step, ReconcileError::Fetch { code: next, source })
            })?;
            fetches += 1;
            files.push(handle.path.clone());

            let previous = last;
            last = self
                .extract(&handle)
                .map_err(|e| fail(Step::Extract { fetch: fetches }, e))?
                .last;
            if last <= previous {
                warn!(previous = %previous, last = %last, "coverage did not advance");
                return Err(fail(
                    Step::Extract { fetch: fetches },
                    ReconcileError::NoProgress {
                        previous,
                        last,
                        expected,
                    },
                ));
            }
        }

        Ok(EntryCoverage {
            first: entry.first,
            expected_last: expected,
            covered_first,
            covered_last: last,
            fetches,
            files,
        })
    }

    /// Reconcile every entry in range map order; each entry completes before
    /// the next one starts.
    pub async fn reconcile_all(
        &self,
        ranges: &RangeMap,
    ) -> Vec<(RangeEntry, Result<EntryCoverage, EntryError>)> {
        let mut out = Vec::with_capacity(ranges.len());
        for entry in ranges.iter() {
            out.push((*entry, self.reconcile_entry(entry).await));
        }
        out
    }

    fn extract(&self, handle: &ResourceHandle) -> Result<CoverageRange, ReconcileError> {
        self.extractor
            .extract(handle)
            .map_err(|source| ReconcileError::Extract {
                path: handle.path.clone(),
                source,
            })
    }
}

/// Reconcile every entry of `ranges` in order, one after another.
pub async fn reconcile<F: Fetcher, X: CoverageExtractor>(
    ranges: &RangeMap,
    fetcher: &F,
    extractor: &X,
    limits: Limits,
) -> Vec<(RangeEntry, Result<EntryCoverage, EntryError>)> {
    Reconciler::new(fetcher, extractor, limits)
        .reconcile_all(ranges)
        .await
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::time::Duration;

    fn limits() -> Limits {
        Limits::default()
    }

    #[tokio::test]
    async fn covered_entry_needs_one_fetch() {
        let fetcher = FakeFetcher::default();
        let extractor = FakeExtractor::default().with("004", "00401", "00599");
        let r = Reconciler::new(&fetcher, &extractor, limits());

        let got = r.reconcile_entry(&entry("00401", "00599")).await.unwrap();
        assert_eq!(got.fetches, 1);
        assert_eq!(got.covered_last, code("00599"));
        assert_eq!(fetcher.requested(), vec!["00401"]);
    }

    #[tokio::test]
    async fn rerun_on_covered_map_fetches_once_per_entry() {
        let fetcher = FakeFetcher::default();
        let extractor = FakeExtractor::default()
            .with("004", "00401", "00599")
            .with("010", "01000", "01099")
            .with("100", "10000", "10299");
        let ranges = RangeMap::new(vec![
            entry("00401", "00599"),
            entry("01000", "01099"),
            entry("10000", "10199"),
        ])
        .unwrap();

        for _ in 0..2 {
            let out = reconcile(&ranges, &fetcher, &extractor, limits()).await;
            assert!(out.iter().all(|(_, r)| r.as_ref().unwrap().fetches == 1));
        }
        assert_eq!(fetcher.requested().len(), 2 * ranges.len());
    }

    #[tokio::test]
    async fn gap_is_filled_from_one_past_coverage() {
        let fetcher = FakeFetcher::default();
        let extractor = FakeExtractor::default()
            .with("001", "00100", "00199")
            .with("002", "00200", "00300");
        let r = Reconciler::new(&fetcher, &extractor, limits());

        let got = r.reconcile_entry(&entry("00100", "00300")).await.unwrap();
        assert_eq!(got.fetches, 2);
        assert_eq!(got.covered_first, code("00100"));
        assert_eq!(got.covered_last, code("00300"));
        // next code is re-padded to five digits
        assert_eq!(fetcher.requested(), vec!["00100", "00200"]);
        assert_eq!(
            got.files,
            vec![PathBuf::from("001.xls"), PathBuf::from("002.xls")]
        );
    }

    #[tokio::test]
    async fn coverage_past_expected_stops_the_loop() {
        let fetcher = FakeFetcher::default();
        let extractor = FakeExtractor::default()
            .with("005", "00500", "00549")
            .with("005", "00550", "00620");
        let r = Reconciler::new(&fetcher, &extractor, limits());

        let got = r.reconcile_entry(&entry("00500", "00599")).await.unwrap();
        assert_eq!(got.fetches, 2);
        assert_eq!(got.covered_last, code("00620"));
        assert_eq!(fetcher.requested(), vec!["00500", "00550"]);
    }

    #[tokio::test]
    async fn repeated_coverage_is_no_progress() {
        let fetcher = FakeFetcher::default();
        // the server keeps answering with the same range
        let extractor = FakeExtractor::default().with("001", "00100", "00150");
        let r = Reconciler::new(&fetcher, &extractor, limits());

        let err = r
            .reconcile_entry(&entry("00100", "00199"))
            .await
            .unwrap_err();
        assert_eq!(err.first, code("00100"));
        assert_eq!(err.step, Step::Extract { fetch: 2 });
        assert!(matches!(err.source, ReconcileError::NoProgress { .. }));
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn fetch_limit_bounds_the_loop() {
        let fetcher = FakeFetcher::default();
        let extractor = FakeExtractor::default()
            .with("001", "00100", "00109")
            .with("001", "00110", "00119")
            .with("001", "00120", "00129")
            .with("001", "00130", "00139");
        let r = Reconciler::new(
            &fetcher,
            &extractor,
            Limits {
                max_fetches_per_entry: 3,
                deadline: None,
            },
        );

        let err = r
            .reconcile_entry(&entry("00100", "00199"))
            .await
            .unwrap_err();
        assert_eq!(err.step, Step::GapFill { fetch: 4 });
        assert!(matches!(err.source, ReconcileError::FetchLimit { fetches: 3, .. }));
        assert_eq!(fetcher.requested().len(), 3);
    }

    #[tokio::test]
    async fn initial_fetch_failure_names_the_step() {
        let fetcher = FakeFetcher {
            failing: vec!["004".to_string()],
            ..Default::default()
        };
        let extractor = FakeExtractor::default();
        let r = Reconciler::new(&fetcher, &extractor, limits());

        let err = r
            .reconcile_entry(&entry("00401", "00599"))
            .await
            .unwrap_err();
        assert_eq!(err.step, Step::InitialFetch);
        assert!(matches!(err.source, ReconcileError::Fetch { .. }));
    }

    #[tokio::test]
    async fn gap_fill_fetch_failure_names_the_step() {
        let fetcher = FakeFetcher {
            failing: vec!["002".to_string()],
            ..Default::default()
        };
        let extractor = FakeExtractor::default().with("001", "00100", "00199");
        let r = Reconciler::new(&fetcher, &extractor, limits());

        let err = r
            .reconcile_entry(&entry("00100", "00300"))
            .await
            .unwrap_err();
        assert_eq!(err.step, Step::GapFill { fetch: 2 });
        match err.source {
            ReconcileError::Fetch { code: c, .. } => assert_eq!(c, code("00200")),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn extract_failure_aborts_only_that_entry() {
        let fetcher = FakeFetcher::default();
        // nothing scripted for prefix 010
        let extractor = FakeExtractor::default().with("004", "00401", "00599");
        let ranges =
            RangeMap::new(vec![entry("01000", "01099"), entry("00401", "00599")]).unwrap();

        let out = reconcile(&ranges, &fetcher, &extractor, limits()).await;
        let err = out[0].1.as_ref().unwrap_err();
        assert_eq!(err.step, Step::Extract { fetch: 1 });
        assert!(matches!(err.source, ReconcileError::Extract { .. }));
        assert!(out[1].1.is_ok());
    }

    #[tokio::test]
    async fn passed_deadline_stops_before_fetching() {
        let fetcher = FakeFetcher::default();
        let extractor = FakeExtractor::default();
        let r = Reconciler::new(
            &fetcher,
            &extractor,
            Limits {
                max_fetches_per_entry: 8,
                deadline: Some(Instant::now() - Duration::from_secs(1)),
            },
        );

        let err = r
            .reconcile_entry(&entry("00100", "00199"))
            .await
            .unwrap_err();
        assert!(matches!(err.source, ReconcileError::DeadlineExceeded));
        assert!(fetcher.requested().is_empty());
    }
}
