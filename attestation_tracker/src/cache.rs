use dashmap::{mapref::entry::Entry, DashMap};

use crate::primitives::{Slot, ValidatorIndex};

/// Latest slot in which each validator was seen attesting.
///
/// Values only ever grow. Entries are never removed.
#[derive(Default, Debug)]
pub struct LastAttestCache {
    slots: DashMap<ValidatorIndex, Slot>,
}

impl LastAttestCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns 0 for validators that have not been seen.
    #[must_use]
    pub fn get(&self, validator_index: ValidatorIndex) -> Slot {
        self.slots
            .get(&validator_index)
            .map(|slot| *slot)
            .unwrap_or_default()
    }

    /// Records `slot` if it is newer than the stored one. Returns whether anything changed.
    pub fn set_if_greater(&self, validator_index: ValidatorIndex, slot: Slot) -> bool {
        match self.slots.entry(validator_index) {
            Entry::Occupied(mut occupied) => {
                if slot > *occupied.get() {
                    occupied.insert(slot);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                true
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
