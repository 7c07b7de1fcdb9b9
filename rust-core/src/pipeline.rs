// Pipelines over immutable traces. Check and commit only borrow the merged
// trace, so they run side by side on scoped threads without locking; batch
// jobs share nothing and run one thread each.

use crate::check::{CheckReport, check_trace};
use crate::commit::{Commitment, commit_trace};
use crate::config::RunConfig;
use crate::error::TraceError;
use crate::merge::{NodeTrace, merge};
use crate::trace::MergedTrace;
use std::panic;
use std::thread;
use tracing::{debug, warn};

/// Independent results of checking and committing one trace.
#[derive(Debug)]
pub struct Verdict {
    pub report: Result<CheckReport, TraceError>,
    pub commitment: Result<Commitment, TraceError>,
}

impl Verdict {
    /// Both passes succeeded and the checker found nothing.
    pub fn is_clean(&self) -> bool {
        matches!(&self.report, Ok(r) if r.is_ok()) && self.commitment.is_ok()
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|payload| panic::resume_unwind(payload))
}

/// Runs the checker and the committer concurrently over `trace`.
pub fn verify(trace: &MergedTrace) -> Verdict {
    thread::scope(|s| {
        let checker = s.spawn(|| check_trace(trace));
        let committer = s.spawn(|| commit_trace(trace));
        Verdict {
            report: join(checker),
            commitment: join(committer),
        }
    })
}

/// One merge→verify job: the per-node inputs of a single run and its config.
#[derive(Clone, Debug)]
pub struct BatchJob {
    pub label: String,
    pub inputs: Vec<NodeTrace>,
    pub run: RunConfig,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub label: String,
    pub result: Result<(MergedTrace, Verdict), TraceError>,
}

fn run_job(job: BatchJob) -> BatchOutcome {
    let result = merge(job.inputs, &job.run).map(|trace| {
        let verdict = verify(&trace);
        (trace, verdict)
    });
    if let Err(e) = &result {
        warn!(label = %job.label, error = %e, "batch job failed to merge");
    }
    BatchOutcome {
        label: job.label,
        result,
    }
}

/// Runs every job on its own thread. Outcomes come back in job order.
pub fn run_batch(jobs: Vec<BatchJob>) -> Vec<BatchOutcome> {
    debug!(jobs = jobs.len(), "running batch");
    thread::scope(|s| {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| s.spawn(move || run_job(job)))
            .collect();
        handles.into_iter().map(join).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{Digest, TraceRow};

    fn row(node_id: u32, ts: u64, weight: i64) -> TraceRow {
        TraceRow {
            node_id,
            row_index: 0,
            timestamp: ts,
            prev_hash: Digest::ZERO,
            parent_present: false,
            author: "aa".repeat(32),
            payload_hash: "bb".repeat(32),
            signature: "cc".repeat(64),
            ancestor_check: true,
            quarantined_until_before: 0,
            quarantined_until_after: 0,
            author_weight_fp: weight,
            merkle_root: None,
            preferred_tip: None,
        }
    }

    #[test]
    fn verify_matches_sequential_passes() {
        let trace = merge(
            vec![NodeTrace::new("n0", vec![row(0, 1, 10)])],
            &RunConfig::default(),
        )
        .unwrap();
        let v = verify(&trace);
        assert!(v.is_clean());
        assert_eq!(v.report.unwrap(), check_trace(&trace).unwrap());
        assert_eq!(v.commitment.unwrap(), commit_trace(&trace).unwrap());
    }

    #[test]
    fn violations_do_not_block_commitment() {
        let trace = merge(
            vec![NodeTrace::new("n0", vec![row(0, 1, 5000)])],
            &RunConfig::default(),
        )
        .unwrap();
        let v = verify(&trace);
        assert!(!v.is_clean());
        assert_eq!(v.report.unwrap().violation_count(), 1);
        assert!(v.commitment.is_ok());
    }

    #[test]
    fn batch_keeps_job_order_and_isolates_failures() {
        let mut strict = RunConfig::default();
        strict.sybil_config.fixed_point_scale = 1;
        let jobs = vec![
            BatchJob {
                label: "ok".into(),
                inputs: vec![NodeTrace::new("n0", vec![row(0, 1, 1)])],
                run: RunConfig::default(),
            },
            BatchJob {
                label: "empty".into(),
                inputs: vec![],
                run: RunConfig::default(),
            },
            BatchJob {
                label: "strict".into(),
                inputs: vec![NodeTrace::new("n0", vec![row(0, 1, 2)])],
                run: strict,
            },
        ];
        let out = run_batch(jobs);
        let labels: Vec<_> = out.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["ok", "empty", "strict"]);
        assert!(out[0].result.as_ref().unwrap().1.is_clean());
        assert!(matches!(out[1].result, Err(TraceError::EmptyInput)));
        let (_, verdict) = out[2].result.as_ref().unwrap();
        assert!(!verdict.is_clean());
    }
}
