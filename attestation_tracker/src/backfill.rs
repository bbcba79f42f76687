use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Error as AnyhowError;
use itertools::Itertools as _;
use log::{debug, info};
use prometheus_metrics::Metrics;
use thiserror::Error;

use crate::{
    consts::DEFAULT_BACKFILL_WORKERS,
    deadline::Deadline,
    misc,
    primitives::Slot,
    slot_processor::SlotProcessor,
};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct BackfillReport {
    pub scanned_slots: u64,
    pub cache_updates: u64,
}

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("failed to resolve head slot for backfill")]
    HeadUnavailable(#[source] AnyhowError),
    #[error(
        "backfill deadline expired \
         (scanned slots: {}, cache updates: {})",
        .partial.scanned_slots,
        .partial.cache_updates
    )]
    DeadlineExpired { partial: BackfillReport },
}

/// Scans the most recent epochs once, newest slots first.
///
/// Slots are fed through a bounded queue to a fixed number of workers.
/// Both sides stop taking work once the deadline passes.
pub struct BackfillScanner {
    processor: Arc<SlotProcessor>,
    workers: usize,
    metrics: Option<Arc<Metrics>>,
}

impl BackfillScanner {
    #[must_use]
    pub fn new(processor: Arc<SlotProcessor>, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            processor,
            workers: DEFAULT_BACKFILL_WORKERS,
            metrics,
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub async fn backfill(&self, deadline: &Deadline) -> Result<BackfillReport, BackfillError> {
        let _timer = self
            .metrics
            .as_ref()
            .map(|metrics| metrics.tracker_backfill_times.start_timer());

        let head_slot = self
            .processor
            .api()
            .resolve_head(deadline)
            .await
            .map_err(BackfillError::HeadUnavailable)?
            .slot;

        let epochs = misc::backfill_epochs(misc::compute_epoch_at_slot(head_slot));

        info!(
            "backfilling last attestation slots from epoch {} down to epoch {} \
             (head slot: {head_slot}, workers: {})",
            epochs.end(),
            epochs.start(),
            self.workers,
        );

        let report = self
            .scan_slots(misc::slots_newest_first(epochs), deadline)
            .await;

        if deadline.is_expired() {
            return Err(BackfillError::DeadlineExpired { partial: report });
        }

        info!(
            "backfill completed (scanned slots: {}, cache updates: {})",
            report.scanned_slots, report.cache_updates,
        );

        Ok(report)
    }

    async fn scan_slots(
        &self,
        slots: impl Iterator<Item = Slot>,
        deadline: &Deadline,
    ) -> BackfillReport {
        let (job_tx, job_rx) = async_channel::bounded(self.workers.saturating_mul(2));
        let scanned_slots = AtomicU64::new(0);
        let cache_updates = AtomicU64::new(0);

        let produce = async move {
            for slot in slots {
                tokio::select! {
                    biased;

                    () = deadline.expired() => break,
                    result = job_tx.send(slot) => if result.is_err() {
                        break;
                    },
                }
            }

            // Dropping the sender closes the queue once it drains.
            drop(job_tx);
        };

        let workers = (0..self.workers)
            .map(|worker| {
                let job_rx = job_rx.clone();
                let scanned_slots = &scanned_slots;
                let cache_updates = &cache_updates;

                async move {
                    loop {
                        let slot = tokio::select! {
                            biased;

                            () = deadline.expired() => break,
                            job = job_rx.recv() => match job {
                                Ok(slot) => slot,
                                Err(_) => break,
                            },
                        };

                        let updates = self.processor.process_slot(slot, deadline).await;

                        scanned_slots.fetch_add(1, Ordering::Relaxed);
                        cache_updates.fetch_add(updates, Ordering::Relaxed);
                    }

                    debug!("backfill worker {worker} finished");
                }
            })
            .collect_vec();

        drop(job_rx);

        futures::join!(produce, futures::future::join_all(workers));

        BackfillReport {
            scanned_slots: scanned_slots.into_inner(),
            cache_updates: cache_updates.into_inner(),
        }
    }
}
