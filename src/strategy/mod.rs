// src/strategy/mod.rs

use chrono::Utc;
use clap::ValueEnum;
use futures::{stream, StreamExt};
use serde::Deserialize;
use std::time::Instant;
use tracing::{info, instrument};

use crate::coverage::CoverageExtractor;
use crate::fetch::Fetcher;
use crate::ranges::RangeMap;
use crate::reconcile::Reconciler;
use crate::report::{EntryReport, RunSummary};

/// How range entries are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Each entry fully reconciled before the next starts.
    Sequential,
    /// Initial fetches for all entries in flight together (at most
    /// `max_in_flight` at once); gap filling afterwards, entry by entry.
    Concurrent { max_in_flight: usize },
}

impl Strategy {
    pub fn new(kind: StrategyKind, max_in_flight: usize) -> Self {
        match kind {
            StrategyKind::Sequential => Strategy::Sequential,
            StrategyKind::Concurrent => Strategy::Concurrent {
                max_in_flight: max_in_flight.max(1),
            },
        }
    }
}

/// Reconcile every entry of `ranges` with the given strategy.
///
/// Both strategies run on the calling task; concurrency comes from polling
/// several fetch futures at once, not from extra threads.
#[instrument(level = "info", skip(ranges, reconciler), fields(entries = ranges.len()))]
pub async fn run<F: Fetcher, X: CoverageExtractor>(
    strategy: Strategy,
    ranges: &RangeMap,
    reconciler: &Reconciler<'_, F, X>,
) -> RunSummary {
    let started_at = Utc::now();
    let start = Instant::now();

    let entries: Vec<EntryReport> = match strategy {
        Strategy::Sequential => reconciler
            .reconcile_all(ranges)
            .await
            .into_iter()
            .map(|(entry, outcome)| EntryReport { entry, outcome })
            .collect(),
        Strategy::Concurrent { max_in_flight } => {
            // buffered keeps results in range map order
            let initial: Vec<_> = stream::iter(ranges.iter())
                .map(|entry| async move { (entry, reconciler.initial_fetch(entry).await) })
                .buffered(max_in_flight)
                .collect()
                .await;
            info!(fetched = initial.len(), "initial fetches complete");

            // TODO: tails are independent per entry and could run concurrently too
            let mut out = Vec::with_capacity(initial.len());
            for (entry, handle) in initial {
                let outcome = match handle {
                    Ok(handle) => reconciler.fill_gaps(entry, handle).await,
                    Err(e) => Err(e),
                };
                out.push(EntryReport {
                    entry: *entry,
                    outcome,
                });
            }
            out
        }
    };

    RunSummary {
        started_at,
        elapsed: start.elapsed(),
        entries,
    }
}
