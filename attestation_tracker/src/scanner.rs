use core::time::Duration;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    consts::{HEAD_RESOLUTION_TIMEOUT, SCAN_TICK_TIMEOUT, SLOT_DURATION},
    deadline::Deadline,
    primitives::Slot,
    slot_processor::SlotProcessor,
};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct ScanReport {
    pub first_slot: Slot,
    pub last_slot: Slot,
    pub scanned_slots: u64,
    pub cache_updates: u64,
    pub deadline_expired: bool,
}

/// Follows the chain head, scanning every slot once.
///
/// The first tick only scans the head slot. Later ticks scan everything between the last
/// scanned slot and the new head. Slots skipped because a tick ran out of time are not
/// revisited.
pub struct ContinuousScanner {
    processor: Arc<SlotProcessor>,
    last_scanned_slot: Mutex<Slot>,
    period: Duration,
    head_timeout: Duration,
    scan_timeout: Duration,
}

impl ContinuousScanner {
    #[must_use]
    pub fn new(processor: Arc<SlotProcessor>) -> Self {
        Self {
            processor,
            last_scanned_slot: Mutex::new(0),
            period: SLOT_DURATION,
            head_timeout: HEAD_RESOLUTION_TIMEOUT,
            scan_timeout: SCAN_TICK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, head_timeout: Duration, scan_timeout: Duration) -> Self {
        self.head_timeout = head_timeout;
        self.scan_timeout = scan_timeout;
        self
    }

    fn last_scanned_slot(&self) -> Slot {
        *self.last_scanned_slot.lock()
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("attestation scanner started (period: {:?})", self.period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&shutdown).await;
                }
                () = shutdown.cancelled() => break,
            }
        }

        info!("attestation scanner stopped");
    }

    /// Returns `None` if the head could not be resolved or there was nothing new to scan.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Option<ScanReport> {
        let head_deadline = Deadline::after(self.head_timeout).with_cancellation(shutdown);

        let head_slot = match self.processor.api().resolve_head(&head_deadline).await {
            Ok(head) => head.slot,
            Err(error) => {
                warn!("failed to resolve head slot for attestation scan: {error:?}");
                return None;
            }
        };

        let last_scanned_slot = self.last_scanned_slot();

        let first_slot = if last_scanned_slot == 0 {
            head_slot
        } else {
            last_scanned_slot.saturating_add(1)
        };

        if first_slot > head_slot {
            debug!("no new slots to scan (last scanned: {last_scanned_slot}, head: {head_slot})");
            return None;
        }

        debug!("scanning slots {first_slot}..={head_slot} for attestations");

        let deadline = Deadline::after(self.scan_timeout).with_cancellation(shutdown);

        let mut report = ScanReport {
            first_slot,
            last_slot: head_slot,
            ..ScanReport::default()
        };

        for slot in first_slot..=head_slot {
            if deadline.is_expired() {
                report.deadline_expired = true;
                break;
            }

            report.cache_updates += self.processor.process_slot(slot, &deadline).await;
            report.scanned_slots += 1;
        }

        *self.last_scanned_slot.lock() = head_slot;

        if report.deadline_expired {
            warn!(
                "attestation scan stopped early at the deadline \
                 (slots: {first_slot}..={head_slot}, scanned: {}, cache updates: {})",
                report.scanned_slots, report.cache_updates,
            );
        } else {
            info!(
                "attestation scan completed (slots: {first_slot}..={head_slot}, cache updates: {})",
                report.cache_updates,
            );
        }

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use httpmock::{Method, Mock, MockServer};
    use serde_json::json;

    use crate::{
        cache::LastAttestCache,
        slot_processor::tests::{block_with_attestations, mock_committees, processor},
    };

    use super::*;

    fn mock_head(server: &MockServer, slot: Slot) -> Mock<'_> {
        server.mock(|when, then| {
            when.method(Method::GET).path("/eth/v1/beacon/headers/head");
            then.status(200).json_body(json!({
                "data": {
                    "root": format!("0x{slot:064x}"),
                    "header": { "message": { "slot": slot.to_string() } },
                },
            }));
        })
    }

    fn mock_block(server: &MockServer, slot: Slot, attestations: bool) -> Mock<'_> {
        let attestations = if attestations {
            json!([{ "aggregation_bits": "0x03", "committee_bits": "0x01" }])
        } else {
            json!([])
        };

        server.mock(|when, then| {
            when.method(Method::GET)
                .path(format!("/eth/v2/beacon/blocks/{slot}"));
            then.status(200)
                .json_body(block_with_attestations(slot, &attestations));
        })
    }

    fn scanner(server: &MockServer, cache: Arc<LastAttestCache>) -> Result<ContinuousScanner> {
        Ok(ContinuousScanner::new(Arc::new(processor(server, cache)?)))
    }

    #[tokio::test]
    async fn first_tick_scans_only_the_head_slot() -> Result<()> {
        let server = MockServer::start();
        let cache = Arc::new(LastAttestCache::new());

        mock_head(&server, 100);
        let older_block = mock_block(&server, 99, true);
        mock_block(&server, 100, true);
        mock_committees(&server, 100, &["42", "17"]);

        let scanner = scanner(&server, Arc::clone(&cache))?;
        let report = scanner.tick(&CancellationToken::new()).await;

        assert_eq!(
            report,
            Some(ScanReport {
                first_slot: 100,
                last_slot: 100,
                scanned_slots: 1,
                cache_updates: 2,
                deadline_expired: false,
            }),
        );

        assert_eq!(scanner.last_scanned_slot(), 100);
        assert_eq!(cache.get(42), 100);
        older_block.assert_hits(0);

        Ok(())
    }

    #[tokio::test]
    async fn later_ticks_catch_up_to_the_new_head() -> Result<()> {
        let server = MockServer::start();
        let cache = Arc::new(LastAttestCache::new());

        let mut head_mock = mock_head(&server, 100);
        mock_block(&server, 100, false);

        let scanner = scanner(&server, Arc::clone(&cache))?;
        let shutdown = CancellationToken::new();

        assert!(scanner.tick(&shutdown).await.is_some());

        // The head has not moved.
        assert_eq!(scanner.tick(&shutdown).await, None);

        head_mock.delete();
        mock_head(&server, 103);
        mock_block(&server, 101, false);
        mock_block(&server, 103, true);
        mock_committees(&server, 103, &["42", "17"]);

        // Slot 102 is missing and answered with 404.
        let report = scanner.tick(&shutdown).await;

        assert_eq!(
            report,
            Some(ScanReport {
                first_slot: 101,
                last_slot: 103,
                scanned_slots: 3,
                cache_updates: 2,
                deadline_expired: false,
            }),
        );

        assert_eq!(scanner.last_scanned_slot(), 103);
        assert_eq!(cache.get(17), 103);

        Ok(())
    }

    #[tokio::test]
    async fn head_failure_makes_no_progress() -> Result<()> {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.path_contains("/head");
            then.status(500);
        });

        let scanner = scanner(&server, Arc::new(LastAttestCache::new()))?;

        assert_eq!(scanner.tick(&CancellationToken::new()).await, None);
        assert_eq!(scanner.last_scanned_slot(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn expired_scan_moves_cursor_to_head_anyway() -> Result<()> {
        let server = MockServer::start();

        mock_head(&server, 100);

        let block_mocks = (91..=100)
            .map(|slot| {
                server.mock(|when, then| {
                    when.path(format!("/eth/v2/beacon/blocks/{slot}"));
                    then.status(200)
                        .delay(Duration::from_millis(100))
                        .json_body(block_with_attestations(slot, &json!([])));
                })
            })
            .collect::<Vec<_>>();

        let scanner = scanner(&server, Arc::new(LastAttestCache::new()))?
            .with_timeouts(Duration::from_secs(10), Duration::from_millis(250));

        *scanner.last_scanned_slot.lock() = 90;

        let report = scanner
            .tick(&CancellationToken::new())
            .await
            .expect("head should be resolved");

        assert!(report.deadline_expired);
        assert!(report.scanned_slots < 10);
        assert_eq!(scanner.last_scanned_slot(), 100);

        let hits = block_mocks.iter().map(Mock::hits).sum::<usize>();
        assert!(hits < 10);

        Ok(())
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() -> Result<()> {
        let server = MockServer::start();
        let scanner = scanner(&server, Arc::new(LastAttestCache::new()))?;
        let shutdown = CancellationToken::new();

        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), scanner.run(shutdown)).await?;

        Ok(())
    }
}
