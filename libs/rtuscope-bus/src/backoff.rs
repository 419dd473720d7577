//! Per-unit timeout back-off
//!
//! Units that stop answering get paused with exponentially growing
//! back-off instead of being hammered, without ever affecting requests to
//! healthy units.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::constants::{
    BACKOFF_INITIAL_MS, BACKOFF_MAX_MS, BACKOFF_PAUSE_THRESHOLD,
};

#[derive(Debug, Clone)]
struct UnitBackoff {
    consecutive_timeouts: u32,
    backoff_ms: u64,
    paused_until_ms: u64,
}

impl Default for UnitBackoff {
    fn default() -> Self {
        Self {
            consecutive_timeouts: 0,
            backoff_ms: BACKOFF_INITIAL_MS,
            paused_until_ms: 0,
        }
    }
}

/// Back-off state for every unit that has timed out at least once.
#[derive(Debug, Default)]
pub struct BackoffTable {
    units: FxHashMap<u8, UnitBackoff>,
}

impl BackoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response timeout. At the pause threshold the unit is
    /// paused for the current back-off, which then doubles up to the cap.
    /// Returns the pause deadline when a pause was (re)armed.
    pub fn record_timeout(&mut self, unit_id: u8, now_ms: u64) -> Option<u64> {
        let state = self.units.entry(unit_id).or_default();
        state.consecutive_timeouts += 1;
        if state.consecutive_timeouts >= BACKOFF_PAUSE_THRESHOLD {
            state.paused_until_ms = now_ms + state.backoff_ms;
            state.backoff_ms = (state.backoff_ms * 2).min(BACKOFF_MAX_MS);
            Some(state.paused_until_ms)
        } else {
            None
        }
    }

    /// Any CRC-valid response from the unit, exception or success,
    /// resets the whole series.
    pub fn record_valid_response(&mut self, unit_id: u8) {
        if let Some(state) = self.units.get_mut(&unit_id) {
            state.consecutive_timeouts = 0;
            state.backoff_ms = BACKOFF_INITIAL_MS;
            state.paused_until_ms = 0;
        }
    }

    pub fn is_paused(&self, unit_id: u8, now_ms: u64) -> bool {
        self.units
            .get(&unit_id)
            .map(|s| now_ms < s.paused_until_ms)
            .unwrap_or(false)
    }

    pub fn consecutive_timeouts(&self, unit_id: u8) -> u32 {
        self.units
            .get(&unit_id)
            .map(|s| s.consecutive_timeouts)
            .unwrap_or(0)
    }

    pub fn backoff_ms(&self, unit_id: u8) -> u64 {
        self.units
            .get(&unit_id)
            .map(|s| s.backoff_ms)
            .unwrap_or(BACKOFF_INITIAL_MS)
    }

    /// Snapshot for diagnostic consumers, sorted by unit.
    pub fn snapshot(&self, now_ms: u64) -> Vec<UnitBackoffInfo> {
        let mut out: Vec<UnitBackoffInfo> = self
            .units
            .iter()
            .map(|(&unit_id, state)| UnitBackoffInfo {
                unit_id,
                consecutive_timeouts: state.consecutive_timeouts,
                backoff_ms: state.backoff_ms,
                paused_until_ms: state.paused_until_ms,
                paused: now_ms < state.paused_until_ms,
                pause_remaining_ms: state.paused_until_ms.saturating_sub(now_ms),
            })
            .collect();
        out.sort_by_key(|info| info.unit_id);
        out
    }
}

/// Exported back-off state for one unit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitBackoffInfo {
    pub unit_id: u8,
    pub consecutive_timeouts: u32,
    pub backoff_ms: u64,
    pub paused_until_ms: u64,
    pub paused: bool,
    pub pause_remaining_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_armed_at_third_timeout() {
        let mut table = BackoffTable::new();
        assert_eq!(table.record_timeout(1, 100), None);
        assert_eq!(table.record_timeout(1, 200), None);
        assert!(!table.is_paused(1, 250));

        let deadline = table.record_timeout(1, 300).expect("third timeout pauses");
        assert_eq!(deadline, 300 + BACKOFF_INITIAL_MS);
        assert!(table.is_paused(1, 300 + BACKOFF_INITIAL_MS - 1));
        assert!(!table.is_paused(1, 300 + BACKOFF_INITIAL_MS));
        assert_eq!(table.consecutive_timeouts(1), 3);
        // Doubled after arming the pause
        assert_eq!(table.backoff_ms(1), BACKOFF_INITIAL_MS * 2);
    }

    #[test]
    fn test_backoff_doubles_to_cap_and_clamps() {
        let mut table = BackoffTable::new();
        let mut now = 0;
        for _ in 0..3 {
            table.record_timeout(1, now);
            now += 1000;
        }
        let mut expected = BACKOFF_INITIAL_MS * 2;
        // Timeouts 4..: each one re-arms and doubles
        for _ in 0..8 {
            table.record_timeout(1, now);
            expected = (expected * 2).min(BACKOFF_MAX_MS);
            assert_eq!(table.backoff_ms(1), expected);
            now += 1000;
        }
        assert_eq!(table.backoff_ms(1), BACKOFF_MAX_MS);
    }

    #[test]
    fn test_valid_response_resets_series() {
        let mut table = BackoffTable::new();
        for i in 0..5 {
            table.record_timeout(1, i * 1000);
        }
        assert!(table.is_paused(1, 4100));

        table.record_valid_response(1);
        assert_eq!(table.consecutive_timeouts(1), 0);
        assert_eq!(table.backoff_ms(1), BACKOFF_INITIAL_MS);
        assert!(!table.is_paused(1, 4100));
    }

    #[test]
    fn test_units_are_independent() {
        let mut table = BackoffTable::new();
        for _ in 0..3 {
            table.record_timeout(7, 0);
        }
        assert!(table.is_paused(7, 100));
        assert!(!table.is_paused(8, 100));
    }

    #[test]
    fn test_snapshot_sorted() {
        let mut table = BackoffTable::new();
        table.record_timeout(9, 0);
        table.record_timeout(3, 0);
        let snap = table.snapshot(0);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].unit_id, 3);
        assert_eq!(snap[1].unit_id, 9);
    }
}
