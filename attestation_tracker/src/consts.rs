use core::time::Duration;

use crate::primitives::Epoch;

pub const SECONDS_PER_SLOT: u64 = 12;
pub const SLOTS_PER_EPOCH: u64 = 32;
pub const SLOT_DURATION: Duration = Duration::from_secs(SECONDS_PER_SLOT);

/// Number of epochs scanned by a backfill, the head epoch included.
pub const BACKFILL_EPOCHS: Epoch = 3;
pub const DEFAULT_BACKFILL_WORKERS: usize = 16;

pub const BLOCK_FETCH_ATTEMPTS: u32 = 3;
pub const BLOCK_FETCH_BACKOFF_STEP: Duration = Duration::from_millis(100);

pub const HEAD_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const SCAN_TICK_TIMEOUT: Duration = Duration::from_secs(90);
