//! Subsets of beacon node API responses that the tracker reads.
//!
//! Fields the tracker has no use for are ignored. Missing optional sections decode to their
//! defaults so that unexpected response shapes degrade to "nothing found" instead of errors.

use serde::Deserialize;
use serde_with::{As, DisplayFromStr, PickFirst, Same};

use crate::primitives::{CommitteeIndex, Slot, ValidatorIndex};

// The Beacon Node API encodes integers as strings. Plain numbers are accepted too.
type StringOrNumber = PickFirst<(DisplayFromStr, Same)>;

#[derive(Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// `GET /eth/v1/beacon/headers/head`
#[derive(Deserialize)]
pub struct HeadHeader {
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub header: SignedHeader,
}

#[derive(Default, Deserialize)]
pub struct SignedHeader {
    #[serde(default)]
    pub message: HeaderMessage,
}

#[derive(Default, Deserialize)]
pub struct HeaderMessage {
    #[serde(default, with = "As::<Option<StringOrNumber>>")]
    pub slot: Option<Slot>,
}

/// `GET /eth/v2/beacon/blocks/head`
///
/// Some nodes report the block root at the top level, others inside `data`.
#[derive(Deserialize)]
pub struct HeadBlock {
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub data: HeadBlockData,
}

#[derive(Default, Deserialize)]
pub struct HeadBlockData {
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub message: HeaderMessage,
}

/// `GET /eth/v2/beacon/blocks/{slot}`
#[derive(Deserialize)]
pub struct BlockResponse {
    #[serde(default)]
    pub data: SignedBlock,
}

#[derive(Default, Deserialize)]
pub struct SignedBlock {
    #[serde(default)]
    pub message: BlockMessage,
}

#[derive(Default, Deserialize)]
pub struct BlockMessage {
    #[serde(default)]
    pub body: BlockBody,
}

#[derive(Clone, Default, Debug, Deserialize)]
pub struct BlockBody {
    #[serde(default)]
    pub attestations: Vec<Attestation>,
}

#[derive(Clone, Default, Debug, Deserialize)]
pub struct Attestation {
    #[serde(default)]
    pub aggregation_bits: String,
    /// Present since Electra. One bit per committee of the slot.
    #[serde(default)]
    pub committee_bits: Option<String>,
}

/// An element of `GET /eth/v1/beacon/states/{state_id}/committees`.
#[derive(Deserialize)]
pub struct Committee {
    #[serde(with = "As::<StringOrNumber>")]
    pub index: CommitteeIndex,
    #[serde(with = "As::<Vec<StringOrNumber>>")]
    pub validators: Vec<ValidatorIndex>,
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::*;

    #[test]
    fn committee_accepts_strings_and_numbers() -> Result<()> {
        let committee = serde_json::from_value::<Committee>(json!({
            "index": "3",
            "slot": "100",
            "validators": ["42", 17, "9"],
        }))?;

        assert_eq!(committee.index, 3);
        assert_eq!(committee.validators, [42, 17, 9]);

        Ok(())
    }

    #[test]
    fn block_without_attestations_has_empty_body() -> Result<()> {
        let block = serde_json::from_value::<BlockResponse>(json!({
            "version": "electra",
            "data": { "message": { "slot": "5", "body": {} } },
        }))?;

        assert!(block.data.message.body.attestations.is_empty());

        Ok(())
    }

    #[test]
    fn attestation_without_committee_bits_decodes() -> Result<()> {
        let attestation = serde_json::from_value::<Attestation>(json!({
            "aggregation_bits": "0x03",
            "data": { "slot": "5", "index": "1" },
        }))?;

        assert_eq!(attestation.aggregation_bits, "0x03");
        assert_eq!(attestation.committee_bits, None);

        Ok(())
    }
}
