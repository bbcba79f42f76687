use std::collections::HashMap;

use itertools::Itertools as _;

use crate::{
    bitfield,
    containers::Attestation,
    primitives::{CommitteeIndex, ValidatorIndex},
};

/// Validators of every committee assigned to a slot, in committee order.
pub type CommitteeAssignment = HashMap<CommitteeIndex, Vec<ValidatorIndex>>;

/// Committees included in an attestation, in ascending order.
#[must_use]
pub fn included_committees(committee_bits: &str) -> Vec<CommitteeIndex> {
    bitfield::decode(committee_bits)
        .iter_ones()
        .filter_map(|index| CommitteeIndex::try_from(index).ok())
        .collect()
}

/// Validators whose votes are aggregated in `attestation`.
///
/// Aggregation bits index into the concatenation of the included committees.
/// Positions past the end of that concatenation are ignored. The result is not deduplicated.
#[must_use]
pub fn attesting_indices(
    attestation: &Attestation,
    committees: &CommitteeAssignment,
) -> Vec<ValidatorIndex> {
    let Some(committee_bits) = attestation
        .committee_bits
        .as_deref()
        .filter(|committee_bits| !committee_bits.is_empty())
    else {
        // TODO: Resolve pre-Electra attestations through `data.index` once the tracker
        //       decodes attestation data.
        return vec![];
    };

    let participants = included_committees(committee_bits)
        .into_iter()
        .filter_map(|committee_index| committees.get(&committee_index))
        .flatten()
        .copied()
        .collect_vec();

    bitfield::decode(&attestation.aggregation_bits)
        .iter_ones()
        .filter_map(|position| participants.get(position).copied())
        .collect()
}
