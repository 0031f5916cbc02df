use log::warn;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::convert::ConversionOutcome;
use crate::error::PipelineError;
use crate::inventory::FrameRecord;
use crate::progress::{Progress, ProgressPhase};

/// Totals for one scheduled stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Frame index and reason, in frame order
    pub failures: Vec<(u32, String)>,
    /// Stopped at a batch boundary before every record was processed
    pub cancelled: bool,
}

impl BatchSummary {
    /// Records that reached an outcome, whatever it was.
    pub fn processed(&self) -> usize {
        self.converted + self.skipped + self.failed
    }

    /// True when there was work and none of it succeeded or was skipped.
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.failed == self.total
    }
}

/// Drives a per-frame job over contiguous batches, reporting once per batch.
///
/// Frames inside a batch run on a rayon pool. Cancellation is only observed
/// between batches, so a frame's output is never interrupted mid-write.
pub struct BatchScheduler {
    batch_size: usize,
    pool: Option<rayon::ThreadPool>,
    cancel: Arc<AtomicBool>,
}

impl BatchScheduler {
    /// Scheduler over batches of `batch_size` records (at least one).
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pool: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bound the worker count. Without this the global rayon pool is used.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("building worker pool: {}", e)))?;
        self.pool = Some(pool);
        Ok(self)
    }

    /// Share a flag that stops the run at the next batch boundary.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `job` over every record, batch by batch in order.
    ///
    /// `on_progress` is called on the calling thread after each batch with
    /// the cumulative count. A failed record is logged and listed in the
    /// summary; it never stops the remaining records.
    pub fn run<J, P>(&self, records: &[FrameRecord], phase: ProgressPhase, job: J, mut on_progress: P) -> BatchSummary
    where
        J: Fn(&FrameRecord) -> ConversionOutcome + Sync,
        P: FnMut(&Progress),
    {
        let total = records.len();
        let converted = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let mut summary = BatchSummary {
            total,
            ..BatchSummary::default()
        };
        let mut done = 0;

        for batch in records.chunks(self.batch_size) {
            if self.cancel.load(Ordering::SeqCst) {
                summary.cancelled = true;
                break;
            }

            let work = || -> Vec<ConversionOutcome> {
                batch
                    .par_iter()
                    .map(|record| {
                        let outcome = job(record);
                        let counter = match outcome {
                            ConversionOutcome::Converted => &converted,
                            ConversionOutcome::Skipped => &skipped,
                            ConversionOutcome::Failed(_) => &failed,
                        };
                        counter.fetch_add(1, Ordering::SeqCst);
                        outcome
                    })
                    .collect()
            };
            let outcomes = match &self.pool {
                Some(pool) => pool.install(work),
                None => work(),
            };

            for (record, outcome) in batch.iter().zip(outcomes) {
                if let ConversionOutcome::Failed(reason) = outcome {
                    warn!("frame {} failed: {}", record.index, reason);
                    summary.failures.push((record.index, reason));
                }
            }

            done += batch.len();
            on_progress(&Progress::batch(phase, done, total));
        }

        summary.converted = converted.into_inner();
        summary.skipped = skipped.into_inner();
        summary.failed = failed.into_inner();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn records(n: u32) -> Vec<FrameRecord> {
        (1..=n).map(|i| FrameRecord::new(Path::new("frames"), i)).collect()
    }

    #[test]
    fn one_progress_update_per_batch() {
        let scheduler = BatchScheduler::new(50);
        let mut updates = Vec::new();
        let summary = scheduler.run(
            &records(120),
            ProgressPhase::ConvertingFrames,
            |_| ConversionOutcome::Converted,
            |p| updates.push((p.completed, p.total)),
        );
        assert_eq!(updates, vec![(50, 120), (100, 120), (120, 120)]);
        assert_eq!(summary.converted, 120);
        assert_eq!(summary.processed(), 120);
        assert!(!summary.cancelled);
    }

    #[test]
    fn outcomes_are_counted_and_failures_kept_in_order() {
        let scheduler = BatchScheduler::new(2).with_workers(2).unwrap();
        let summary = scheduler.run(
            &records(5),
            ProgressPhase::ConvertingFrames,
            |r| match r.index {
                1 => ConversionOutcome::Skipped,
                2 | 4 => ConversionOutcome::Failed(format!("bad {}", r.index)),
                _ => ConversionOutcome::Converted,
            },
            |_| {},
        );
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.converted, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(
            summary.failures,
            vec![(2, "bad 2".to_string()), (4, "bad 4".to_string())]
        );
        assert!(!summary.all_failed());
    }

    #[test]
    fn cancellation_finishes_the_current_batch() {
        let cancel = Arc::new(AtomicBool::new(false));
        let scheduler = BatchScheduler::new(3).with_cancel_flag(Arc::clone(&cancel));
        let seen = AtomicUsize::new(0);
        let summary = scheduler.run(
            &records(10),
            ProgressPhase::ConvertingFrames,
            |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                cancel.store(true, Ordering::SeqCst);
                ConversionOutcome::Converted
            },
            |_| {},
        );
        assert!(summary.cancelled);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(summary.converted, 3);
        assert_eq!(summary.total, 10);
    }

    #[test]
    fn empty_input_reports_nothing() {
        let mut calls = 0;
        let summary = BatchScheduler::new(0).run(
            &[],
            ProgressPhase::RenderingFrames,
            |_| ConversionOutcome::Converted,
            |_| calls += 1,
        );
        assert_eq!(calls, 0);
        assert_eq!(summary, BatchSummary::default());
        assert!(!summary.all_failed());
    }
}
