//! Conversion from external clock deltas to mixer ticks

use crate::config::{HardwareProfile, SANITY_TICK_LIMIT};
use bincode::{Decode, Encode};

const TICK_INTERVAL: u64 = HardwareProfile::TICK_INTERVAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct ClockAccumulator {
    pending: u64,
}

impl ClockAccumulator {
    pub fn add(&mut self, clocks: i64) {
        if clocks < 0 {
            log::warn!("Ignoring negative clock delta: {clocks}");
            return;
        }

        self.pending = self.pending.saturating_add(clocks as u64);
    }

    /// Remove and return the number of whole ticks accumulated so far, never more than
    /// [`SANITY_TICK_LIMIT`]. Clocks beyond the limit are dropped.
    pub fn take_ticks(&mut self) -> u64 {
        let ticks = self.pending / TICK_INTERVAL;
        if ticks > SANITY_TICK_LIMIT {
            log::warn!("Clock delta of {ticks} ticks clamped to {SANITY_TICK_LIMIT}");
            self.pending %= TICK_INTERVAL;
            return SANITY_TICK_LIMIT;
        }

        self.pending -= ticks * TICK_INTERVAL;
        ticks
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }
}
