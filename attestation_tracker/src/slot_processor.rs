use std::sync::Arc;

use log::debug;
use prometheus_metrics::Metrics;

use crate::{
    beacon_api::BeaconApi, cache::LastAttestCache, deadline::Deadline, primitives::Slot, voters,
};

/// Turns the attestations of a single block into last attestation slots.
pub struct SlotProcessor {
    api: Arc<BeaconApi>,
    cache: Arc<LastAttestCache>,
    metrics: Option<Arc<Metrics>>,
}

impl SlotProcessor {
    #[must_use]
    pub const fn new(
        api: Arc<BeaconApi>,
        cache: Arc<LastAttestCache>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            api,
            cache,
            metrics,
        }
    }

    #[must_use]
    pub fn api(&self) -> &BeaconApi {
        &self.api
    }

    /// Returns the number of validators whose last attestation slot moved forward.
    ///
    /// Attestations are credited to the slot of the block that includes them.
    pub async fn process_slot(&self, slot: Slot, deadline: &Deadline) -> u64 {
        let _timer = self
            .metrics
            .as_ref()
            .map(|metrics| metrics.tracker_slot_processing_times.start_timer());

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.tracker_scanned_slots.inc();
        }

        let Some(body) = self.api.fetch_block(slot, deadline).await else {
            return 0;
        };

        if body.attestations.is_empty() {
            debug!("block at slot {slot} has no attestations");
            return 0;
        }

        let committees = self.api.resolve_committees(slot, deadline).await;

        let updates = body
            .attestations
            .iter()
            .flat_map(|attestation| voters::attesting_indices(attestation, &committees))
            .filter(|validator_index| self.cache.set_if_greater(*validator_index, slot))
            .count();

        let updates = u64::try_from(updates).unwrap_or(u64::MAX);

        debug!(
            "processed slot {slot} ({} attestations, {updates} cache updates)",
            body.attestations.len(),
        );

        if let Some(metrics) = self.metrics.as_ref() {
            metrics.tracker_cache_updates.inc_by(updates);
            metrics.set_tracked_validators(self.cache.len());
        }

        updates
    }
}
