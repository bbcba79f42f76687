pub use crate::{
    backfill::{BackfillError, BackfillReport, BackfillScanner},
    beacon_api::{BeaconApi, Error, Head},
    cache::LastAttestCache,
    deadline::Deadline,
    scanner::{ContinuousScanner, ScanReport},
    slot_processor::SlotProcessor,
    voters::CommitteeAssignment,
};

pub mod bitfield;
pub mod consts;
pub mod containers;
pub mod misc;
pub mod primitives;
pub mod voters;

mod backfill;
mod beacon_api;
mod cache;
mod deadline;
mod scanner;
mod slot_processor;
