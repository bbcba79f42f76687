use anyhow::Result;
use prometheus::{histogram_opts, Histogram, HistogramVec, IntCounter, IntGauge};

#[derive(Debug)]
pub struct Metrics {
    // Attestation tracker
    pub tracker_scanned_slots: IntCounter,
    pub tracker_cache_updates: IntCounter,
    pub tracker_block_fetch_failures: IntCounter,
    pub tracker_head_resolution_failures: IntCounter,
    tracker_tracked_validators: IntGauge,
    pub tracker_slot_processing_times: Histogram,
    pub tracker_backfill_times: Histogram,

    // Explorer proxy
    pub proxy_response_times: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            tracker_scanned_slots: IntCounter::new(
                "TRACKER_SCANNED_SLOTS",
                "Number of slots the attestation tracker attempted to scan",
            )?,

            tracker_cache_updates: IntCounter::new(
                "TRACKER_CACHE_UPDATES",
                "Number of last attestation slots moved forward",
            )?,

            tracker_block_fetch_failures: IntCounter::new(
                "TRACKER_BLOCK_FETCH_FAILURES",
                "Number of blocks that could not be fetched after all attempts",
            )?,

            tracker_head_resolution_failures: IntCounter::new(
                "TRACKER_HEAD_RESOLUTION_FAILURES",
                "Number of failed attempts to resolve the chain head",
            )?,

            tracker_tracked_validators: IntGauge::new(
                "TRACKER_TRACKED_VALIDATORS",
                "Number of validators with a known last attestation slot",
            )?,

            tracker_slot_processing_times: Histogram::with_opts(histogram_opts!(
                "TRACKER_SLOT_PROCESSING_TIMES",
                "Time spent fetching and decoding a single slot"
            ))?,

            tracker_backfill_times: Histogram::with_opts(histogram_opts!(
                "TRACKER_BACKFILL_TIMES",
                "Time spent on a backfill of recent epochs",
                vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
            ))?,

            proxy_response_times: HistogramVec::new(
                histogram_opts!(
                    "PROXY_RESPONSE_TIMES",
                    "Explorer proxy response times by route"
                ),
                &["route"],
            )?,
        })
    }

    pub fn register_with_default_metrics(&self) -> Result<()> {
        let default_registry = prometheus::default_registry();

        default_registry.register(Box::new(self.tracker_scanned_slots.clone()))?;
        default_registry.register(Box::new(self.tracker_cache_updates.clone()))?;
        default_registry.register(Box::new(self.tracker_block_fetch_failures.clone()))?;
        default_registry.register(Box::new(self.tracker_head_resolution_failures.clone()))?;
        default_registry.register(Box::new(self.tracker_tracked_validators.clone()))?;
        default_registry.register(Box::new(self.tracker_slot_processing_times.clone()))?;
        default_registry.register(Box::new(self.tracker_backfill_times.clone()))?;
        default_registry.register(Box::new(self.proxy_response_times.clone()))?;

        Ok(())
    }

    pub fn set_tracked_validators(&self, count: usize) {
        self.tracker_tracked_validators
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    #[cfg(test)]
    fn tracked_validators(&self) -> i64 {
        self.tracker_tracked_validators.get()
    }
}
