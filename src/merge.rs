//! Graph merge engine
//!
//! Writes a [`MergePlan`] to a [`GraphStore`] in three tiers, strictly in
//! order: nodes, merge-tier edges, append-tier edges. Within a tier records
//! are de-duplicated by store key before they are cut into batches, so no two
//! batches touch the same key and batches can run on parallel write slots.
//!
//! Transient store failures are retried with exponential backoff
//! (`retry_base_ms * 2^attempt`, capped at `retry_max_ms`, at most
//! `max_retries` times). A permanent failure, or a transient one that runs
//! out of retries, stops new batches from launching; in-flight batches
//! finish, and everything not committed comes back in [`MergeFailure`] for
//! replay. Cancellation behaves the same way.
//!
//! Append-tier edges are not idempotent: merging the same plan twice without
//! clearing those kinds first stores them twice.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::config::MergeConfig;
use crate::error::{GraphError, Result, StoreError};
use crate::model::WriteTier;
use crate::store::{EdgeRecord, GraphStore, NodeRecord, StoreResult};

/// Everything one run wants written
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub nodes: Vec<NodeRecord>,
    pub merge_edges: Vec<EdgeRecord>,
    pub append_edges: Vec<EdgeRecord>,
}

impl MergePlan {
    /// Split edges by the write tier of their kind
    pub fn new(nodes: Vec<NodeRecord>, edges: Vec<EdgeRecord>) -> Self {
        let (merge_edges, append_edges) = edges
            .into_iter()
            .partition(|e| e.kind.tier() == WriteTier::Merge);
        Self {
            nodes,
            merge_edges,
            append_edges,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.merge_edges.len() + self.append_edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeTier {
    Nodes,
    MergeEdges,
    AppendEdges,
}

impl fmt::Display for MergeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Nodes => "nodes",
            Self::MergeEdges => "merge-edges",
            Self::AppendEdges => "append-edges",
        })
    }
}

/// Cooperative stop signal shared with whoever drives the merge
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TierReport {
    pub tier: MergeTier,
    pub records: usize,
    /// Records dropped because a later record had the same store key
    pub duplicates: usize,
    pub batches: usize,
    pub committed_batches: usize,
    pub retries: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub dry_run: bool,
    pub tiers: Vec<TierReport>,
}

impl MergeReport {
    pub fn committed_records(&self, tier: MergeTier) -> usize {
        self.tiers
            .iter()
            .filter(|t| t.tier == tier && t.committed_batches == t.batches)
            .map(|t| t.records)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum HaltCause {
    Store { error: StoreError },
    Cancelled,
}

impl fmt::Display for HaltCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store { error } => write!(f, "{}", error),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A merge that stopped before finishing. `pending` holds every record that
/// was not committed (failed and never-started batches of the halted tier
/// plus all later tiers) and can be passed back to [`GraphMergeEngine::merge`].
#[derive(Error, Debug)]
#[error(
    "merge halted in {tier} tier ({cause}); {committed} batches committed, {pending_records} records pending replay",
    committed = .committed_batches.len(),
    pending_records = .pending.len()
)]
pub struct MergeFailure {
    pub tier: MergeTier,
    pub cause: HaltCause,
    pub failed_batches: Vec<usize>,
    pub committed_batches: Vec<usize>,
    /// Tiers that ran, including the halted one
    pub report: MergeReport,
    pub pending: MergePlan,
}

enum BatchOutcome {
    Committed,
    Failed(StoreError),
    Skipped,
}

struct TierRun<T> {
    report: TierReport,
    failed: Vec<(usize, StoreError)>,
    committed: Vec<usize>,
    /// Uncommitted records in batch order
    pending: Vec<T>,
    cancelled: bool,
}

pub struct GraphMergeEngine<'s> {
    store: &'s dyn GraphStore,
    config: MergeConfig,
    pool: rayon::ThreadPool,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl<'s> GraphMergeEngine<'s> {
    pub fn new(store: &'s dyn GraphStore, config: MergeConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.write_slots.max(1))
            .thread_name(|i| format!("merge-slot-{}", i))
            .build()
            .map_err(|e| GraphError::ConfigError {
                message: format!("Failed to start merge write slots: {}", e),
            })?;
        Ok(Self {
            store,
            config,
            pool,
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Write the plan tier by tier
    pub fn merge(&self, plan: MergePlan) -> std::result::Result<MergeReport, MergeFailure> {
        let mut report = MergeReport {
            dry_run: self.config.dry_run,
            tiers: Vec::new(),
        };
        if self.config.dry_run {
            tracing::info!("[MERGE] dry run: {} records not written", plan.len());
            return Ok(report);
        }

        let MergePlan {
            nodes,
            merge_edges,
            append_edges,
        } = plan;

        let nodes = dedupe(nodes, |n: &NodeRecord| n.node.clone());
        let run = self.run_tier(MergeTier::Nodes, nodes, |b| self.store.upsert_nodes(b));
        if let Some(failure) = self.halted(run, &mut report, |pending| MergePlan {
            nodes: pending,
            merge_edges: merge_edges.clone(),
            append_edges: append_edges.clone(),
        }) {
            return Err(failure);
        }

        let merge_edges = dedupe(merge_edges, |e: &EdgeRecord| {
            let (kind, from, to, disc) = e.merge_key();
            (kind, from.clone(), to.clone(), disc.to_string())
        });
        let run = self.run_tier(MergeTier::MergeEdges, merge_edges, |b| {
            self.store.merge_edges(b)
        });
        if let Some(failure) = self.halted(run, &mut report, |pending| MergePlan {
            nodes: Vec::new(),
            merge_edges: pending,
            append_edges: append_edges.clone(),
        }) {
            return Err(failure);
        }

        let run = self.run_tier(MergeTier::AppendEdges, (append_edges, 0), |b| {
            self.store.append_edges(b)
        });
        if let Some(failure) = self.halted(run, &mut report, |pending| MergePlan {
            nodes: Vec::new(),
            merge_edges: Vec::new(),
            append_edges: pending,
        }) {
            return Err(failure);
        }

        tracing::info!(
            "[MERGE] complete: {} nodes, {} merged edges, {} appended edges",
            report.committed_records(MergeTier::Nodes),
            report.committed_records(MergeTier::MergeEdges),
            report.committed_records(MergeTier::AppendEdges)
        );
        Ok(report)
    }

    fn halted<T>(
        &self,
        run: TierRun<T>,
        report: &mut MergeReport,
        pending_plan: impl FnOnce(Vec<T>) -> MergePlan,
    ) -> Option<MergeFailure> {
        let tier = run.report.tier;
        report.tiers.push(run.report);
        let cause = match run.failed.first() {
            Some((_, error)) => HaltCause::Store {
                error: error.clone(),
            },
            None if run.cancelled => HaltCause::Cancelled,
            None => return None,
        };
        tracing::error!(
            "[MERGE] halted in {} tier: {}; committed batches {:?}",
            tier,
            cause,
            run.committed
        );
        Some(MergeFailure {
            tier,
            cause,
            failed_batches: run.failed.iter().map(|(i, _)| *i).collect(),
            committed_batches: run.committed,
            report: report.clone(),
            pending: pending_plan(run.pending),
        })
    }

    fn run_tier<T, F>(
        &self,
        tier: MergeTier,
        (records, duplicates): (Vec<T>, usize),
        write: F,
    ) -> TierRun<T>
    where
        T: Clone + Send + Sync,
        F: Fn(&[T]) -> StoreResult<usize> + Sync,
    {
        let start = Instant::now();
        let total = records.len();
        let batches: Vec<Vec<T>> = records
            .chunks(self.config.batch_size.max(1))
            .map(<[T]>::to_vec)
            .collect();
        let batch_count = batches.len();
        let halt = AtomicBool::new(false);
        let retries = AtomicU64::new(0);

        if let Some(pb) = &self.progress {
            pb.set_length(batches.len() as u64);
            pb.set_position(0);
            pb.set_message(format!("{}", tier));
        }
        tracing::debug!("[MERGE] {} tier: {} records in {} batches", tier, total, batches.len());

        let outcomes: Vec<BatchOutcome> = self.pool.install(|| {
            batches
                .par_iter()
                .enumerate()
                .map(|(index, batch)| {
                    if halt.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                        return BatchOutcome::Skipped;
                    }
                    let outcome = self.write_with_retry(tier, index, batch, &write, &retries);
                    match outcome {
                        Ok(()) => {
                            if let Some(pb) = &self.progress {
                                pb.inc(1);
                            }
                            BatchOutcome::Committed
                        }
                        Err(error) => {
                            halt.store(true, Ordering::SeqCst);
                            BatchOutcome::Failed(error)
                        }
                    }
                })
                .collect()
        });

        let mut committed = Vec::new();
        let mut failed = Vec::new();
        let mut pending = Vec::new();
        let mut skipped = false;
        for ((index, outcome), batch) in outcomes.into_iter().enumerate().zip(batches) {
            match outcome {
                BatchOutcome::Committed => committed.push(index),
                BatchOutcome::Failed(error) => {
                    failed.push((index, error));
                    pending.extend(batch);
                }
                BatchOutcome::Skipped => {
                    skipped = true;
                    pending.extend(batch);
                }
            }
        }

        let report = TierReport {
            tier,
            records: total,
            duplicates,
            batches: batch_count,
            committed_batches: committed.len(),
            retries: retries.load(Ordering::SeqCst),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        TierRun {
            report,
            failed,
            committed,
            pending,
            cancelled: skipped && self.cancel.is_cancelled(),
        }
    }

    fn write_with_retry<T, F>(
        &self,
        tier: MergeTier,
        index: usize,
        batch: &[T],
        write: &F,
        retries: &AtomicU64,
    ) -> StoreResult<()>
    where
        F: Fn(&[T]) -> StoreResult<usize>,
    {
        let mut attempt = 0u32;
        loop {
            match write(batch) {
                Ok(_) => return Ok(()),
                Err(error) if error.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "[MERGE] {} batch {}: {}; retry {}/{} in {}ms",
                        tier,
                        index,
                        error,
                        attempt + 1,
                        self.config.max_retries,
                        delay.as_millis()
                    );
                    retries.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(error) => {
                    tracing::error!("[MERGE] {} batch {} failed: {}", tier, index, error);
                    return Err(error);
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let ms = self
            .config
            .retry_base_ms
            .saturating_mul(factor)
            .min(self.config.retry_max_ms);
        Duration::from_millis(ms)
    }
}

/// Keep one record per key (the last one seen) in first-seen order
fn dedupe<T, K, F>(records: Vec<T>, key: F) -> (Vec<T>, usize)
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let total = records.len();
    let mut slots: AHashMap<K, usize> = AHashMap::with_capacity(total);
    let mut unique: Vec<T> = Vec::with_capacity(total);
    for record in records {
        match slots.get(&key(&record)) {
            Some(&slot) => unique[slot] = record,
            None => {
                slots.insert(key(&record), unique.len());
                unique.push(record);
            }
        }
    }
    let duplicates = total - unique.len();
    (unique, duplicates)
}
