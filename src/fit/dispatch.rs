//! Dispatch/collect layer.
//!
//! Cluster jobs are enqueued, run on a worker pool and collected as a batch.
//! The layer knows nothing about job content:
//!
//! - a panic inside one job becomes a failed outcome for that cluster only
//! - outcomes are merged into the store keyed by cluster id, in sorted order,
//!   so the result does not depend on completion order

use std::panic::{AssertUnwindSafe, catch_unwind};

use rayon::ThreadPool;
use rayon::prelude::*;

use crate::domain::{ClusterId, SiteStore};
use crate::error::AppError;
use crate::fit::{ClusterJob, ClusterOutcome, ClusterReport, run_cluster};

/// The worker contract used by the model loop.
pub trait WorkQueue {
    fn enqueue(&mut self, job: ClusterJob);
    /// Block until every enqueued job has finished and drain the results.
    fn collect(&mut self) -> Vec<ClusterOutcome>;
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Run one job, turning a panic into a failed outcome.
fn guarded(job: ClusterJob) -> ClusterOutcome {
    let cluster: ClusterId = job.cluster.clone();
    let sites = job.sites.clone();
    match catch_unwind(AssertUnwindSafe(|| run_cluster(job))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let err = AppError::WorkerFailed {
                cluster: cluster.to_string(),
                message: panic_message(payload),
            };
            tracing::error!("{err}");
            ClusterOutcome::failed(&cluster, sites, err.to_string())
        }
    }
}

/// Parallel queue on a rayon pool (the global pool when no size is given).
pub struct RayonQueue {
    pool: Option<ThreadPool>,
    jobs: Vec<ClusterJob>,
}

impl RayonQueue {
    pub fn new(workers: Option<usize>) -> Result<Self, AppError> {
        let pool = match workers {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| AppError::invalid(format!("Cannot start {n} workers: {e}")))?,
            ),
            None => None,
        };
        Ok(Self {
            pool,
            jobs: Vec::new(),
        })
    }
}

impl WorkQueue for RayonQueue {
    fn enqueue(&mut self, job: ClusterJob) {
        self.jobs.push(job);
    }

    fn collect(&mut self) -> Vec<ClusterOutcome> {
        let jobs = std::mem::take(&mut self.jobs);
        let run = move || jobs.into_par_iter().map(guarded).collect::<Vec<_>>();
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

/// In-order queue on the calling thread.
#[derive(Default)]
pub struct SerialQueue {
    jobs: Vec<ClusterJob>,
}

impl WorkQueue for SerialQueue {
    fn enqueue(&mut self, job: ClusterJob) {
        self.jobs.push(job);
    }

    fn collect(&mut self) -> Vec<ClusterOutcome> {
        std::mem::take(&mut self.jobs)
            .into_iter()
            .map(guarded)
            .collect()
    }
}

/// Write every outcome's sites back into `store`.
///
/// Returns the cluster reports sorted by cluster id.
pub fn merge_outcomes(
    store: &mut SiteStore,
    mut outcomes: Vec<ClusterOutcome>,
) -> Result<Vec<ClusterReport>, AppError> {
    outcomes.sort_by(|a, b| a.report.cluster.cmp(&b.report.cluster));
    let mut reports = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        for site in outcome.sites {
            store.replace(site)?;
        }
        reports.push(outcome.report);
    }
    Ok(reports)
}
