use core::ops::RangeInclusive;

use crate::{
    consts::{BACKFILL_EPOCHS, SLOTS_PER_EPOCH},
    primitives::{Epoch, Slot},
};

#[must_use]
pub const fn compute_epoch_at_slot(slot: Slot) -> Epoch {
    slot / SLOTS_PER_EPOCH
}

#[must_use]
pub const fn compute_start_slot_at_epoch(epoch: Epoch) -> Slot {
    epoch.saturating_mul(SLOTS_PER_EPOCH)
}

/// Epochs covered by a backfill started at `head_epoch`, clamped at genesis.
#[must_use]
pub const fn backfill_epochs(head_epoch: Epoch) -> RangeInclusive<Epoch> {
    head_epoch.saturating_sub(BACKFILL_EPOCHS - 1)..=head_epoch
}

/// Every slot of `epochs`, newest epoch first and newest slot first within each epoch.
pub fn slots_newest_first(epochs: RangeInclusive<Epoch>) -> impl Iterator<Item = Slot> {
    epochs.rev().flat_map(|epoch| {
        let start_slot = compute_start_slot_at_epoch(epoch);
        (start_slot..start_slot.saturating_add(SLOTS_PER_EPOCH)).rev()
    })
}
