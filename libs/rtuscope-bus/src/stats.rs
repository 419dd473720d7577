//! Bus statistics: cumulative counters, rolling interval, warning checks

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::DEFAULT_STATS_INTERVAL_MS;

/// Warning thresholds checked at each interval boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WarnThresholds {
    /// Own request failure rate above this warns (0.0 - 1.0)
    pub own_fail: f32,
    /// Observed foreign failure rate above this warns (0.0 - 1.0)
    pub other_fail: f32,
    /// Bus busy percentage above this warns (0.0 - 100.0)
    pub busy_percent: f32,
}

impl Default for WarnThresholds {
    fn default() -> Self {
        Self {
            own_fail: 0.05,
            other_fail: 0.05,
            busy_percent: 95.0,
        }
    }
}

/// Counter set shared by the cumulative and interval views.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusCounters {
    pub frames_received: u32,
    pub frames_sent: u32,
    pub crc_errors: u32,
    pub timeouts: u32,
    pub queue_overflows: u32,

    pub own_requests_sent: u32,
    pub own_requests_success: u32,
    pub own_requests_failed: u32,
    pub own_requests_discarded: u32,

    pub other_requests_seen: u32,
    pub other_responses_seen: u32,
    pub other_exceptions_seen: u32,
    pub other_responses_paired: u32,
    pub other_responses_unpaired: u32,
    pub other_exceptions_paired: u32,
    pub other_exceptions_unpaired: u32,

    pub own_active_time_us: u64,
    pub other_active_time_us: u64,
    pub total_time_us: u64,
}

impl BusCounters {
    pub fn own_failure_rate(&self) -> f32 {
        let total = self.own_requests_success + self.own_requests_failed;
        if total == 0 {
            return 0.0;
        }
        self.own_requests_failed as f32 / total as f32
    }

    pub fn other_failure_rate(&self) -> f32 {
        let total = self.other_responses_seen + self.other_exceptions_seen;
        if total == 0 {
            return 0.0;
        }
        self.other_exceptions_seen as f32 / total as f32
    }

    pub fn bus_idle_percent(&self) -> f32 {
        if self.total_time_us == 0 {
            return 100.0;
        }
        let active = self.own_active_time_us + self.other_active_time_us;
        let idle = self.total_time_us.saturating_sub(active);
        idle as f32 * 100.0 / self.total_time_us as f32
    }

    pub fn bus_busy_percent(&self) -> f32 {
        100.0 - self.bus_idle_percent()
    }
}

/// Cumulative-since-reset and rolling-interval statistics, plus the
/// active-time bookkeeping behind the busy percentage.
#[derive(Debug)]
pub struct BusStats {
    cumulative: BusCounters,
    interval: BusCounters,
    thresholds: WarnThresholds,
    interval_ms: u64,
    interval_started_ms: u64,
    last_reset_ms: u64,

    last_total_sample_us: u64,
    active_since_us: Option<u64>,
    active_is_own: bool,
}

macro_rules! bump {
    ($self:ident, $field:ident) => {
        $self.cumulative.$field += 1;
        $self.interval.$field += 1;
    };
}

impl BusStats {
    pub fn new(thresholds: WarnThresholds, interval_ms: u64) -> Self {
        Self {
            cumulative: BusCounters::default(),
            interval: BusCounters::default(),
            thresholds,
            interval_ms: if interval_ms == 0 {
                DEFAULT_STATS_INTERVAL_MS
            } else {
                interval_ms
            },
            interval_started_ms: 0,
            last_reset_ms: 0,
            last_total_sample_us: 0,
            active_since_us: None,
            active_is_own: false,
        }
    }

    pub fn cumulative(&self) -> BusCounters {
        self.cumulative
    }

    pub fn interval(&self) -> BusCounters {
        self.interval
    }

    pub fn note_frame_received(&mut self) {
        bump!(self, frames_received);
    }
    pub fn note_frame_sent(&mut self) {
        bump!(self, frames_sent);
    }
    pub fn note_crc_error(&mut self) {
        bump!(self, crc_errors);
    }
    pub fn note_timeout(&mut self) {
        bump!(self, timeouts);
    }
    pub fn note_queue_overflow(&mut self) {
        bump!(self, queue_overflows);
    }
    pub fn note_own_sent(&mut self) {
        bump!(self, own_requests_sent);
    }
    pub fn note_own_success(&mut self) {
        bump!(self, own_requests_success);
    }
    pub fn note_own_failed(&mut self) {
        bump!(self, own_requests_failed);
    }
    pub fn note_own_discarded(&mut self, count: u32) {
        self.cumulative.own_requests_discarded += count;
        self.interval.own_requests_discarded += count;
    }
    pub fn note_other_request(&mut self) {
        bump!(self, other_requests_seen);
    }

    pub fn note_other_response(&mut self, paired: bool) {
        bump!(self, other_responses_seen);
        if paired {
            bump!(self, other_responses_paired);
        } else {
            bump!(self, other_responses_unpaired);
        }
    }

    pub fn note_other_exception(&mut self, paired: bool) {
        bump!(self, other_exceptions_seen);
        if paired {
            bump!(self, other_exceptions_paired);
        } else {
            bump!(self, other_exceptions_unpaired);
        }
    }

    /// Advance the wall-time accumulator; called once per tick.
    pub fn sample_total_time(&mut self, now_us: u64) {
        if self.last_total_sample_us != 0 {
            let delta = now_us.saturating_sub(self.last_total_sample_us);
            self.cumulative.total_time_us += delta;
            self.interval.total_time_us += delta;
        }
        self.last_total_sample_us = now_us;
    }

    /// Open an active-time window if none is running.
    pub fn start_active(&mut self, is_own: bool, now_us: u64) {
        if self.active_since_us.is_none() {
            self.active_since_us = Some(now_us);
            self.active_is_own = is_own;
        }
    }

    /// Close a running active-time window and book it.
    pub fn end_active(&mut self, now_us: u64) {
        if let Some(since) = self.active_since_us.take() {
            let duration = now_us.saturating_sub(since);
            if self.active_is_own {
                self.cumulative.own_active_time_us += duration;
                self.interval.own_active_time_us += duration;
            } else {
                self.cumulative.other_active_time_us += duration;
                self.interval.other_active_time_us += duration;
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_since_us.is_some()
    }

    /// Interval boundary: emit warnings when the interval figures cross
    /// the configured thresholds, then reset the interval set.
    pub fn check_interval(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.interval_started_ms) < self.interval_ms {
            return;
        }

        let iv = &self.interval;
        let own_total = iv.own_requests_success + iv.own_requests_failed;
        if own_total >= 20 && iv.own_failure_rate() > self.thresholds.own_fail {
            warn!(
                "own request failure rate {:.1}% ({}/{} failed, {} discarded)",
                iv.own_failure_rate() * 100.0,
                iv.own_requests_failed,
                own_total,
                iv.own_requests_discarded
            );
        }

        let other_total = iv.other_responses_seen + iv.other_exceptions_seen;
        if other_total >= 20 && iv.other_failure_rate() > self.thresholds.other_fail {
            warn!(
                "observed foreign failure rate {:.1}% ({}/{} exceptions)",
                iv.other_failure_rate() * 100.0,
                iv.other_exceptions_seen,
                other_total
            );
        }

        if iv.total_time_us > 0 && iv.bus_busy_percent() > self.thresholds.busy_percent {
            warn!(
                "bus utilization high: busy={:.1}% own={}us other={}us",
                iv.bus_busy_percent(),
                iv.own_active_time_us,
                iv.other_active_time_us
            );
        }

        self.interval = BusCounters::default();
        self.interval_started_ms = now_ms;
    }

    /// Reset the cumulative counter set.
    pub fn reset(&mut self, now_ms: u64) {
        self.cumulative = BusCounters::default();
        self.last_reset_ms = now_ms;
    }

    pub fn last_reset_ms(&self) -> u64 {
        self.last_reset_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> BusStats {
        BusStats::new(WarnThresholds::default(), 60_000)
    }

    #[test]
    fn test_counters_track_both_views() {
        let mut s = stats();
        s.note_own_sent();
        s.note_own_success();
        s.note_crc_error();
        assert_eq!(s.cumulative().own_requests_sent, 1);
        assert_eq!(s.interval().own_requests_sent, 1);
        assert_eq!(s.cumulative().crc_errors, 1);
    }

    #[test]
    fn test_interval_resets_cumulative_survives() {
        let mut s = stats();
        s.note_own_sent();
        s.note_own_failed();
        s.check_interval(60_001);
        assert_eq!(s.interval().own_requests_sent, 0);
        assert_eq!(s.cumulative().own_requests_sent, 1);
        assert_eq!(s.cumulative().own_requests_failed, 1);
    }

    #[test]
    fn test_interval_not_reset_early() {
        let mut s = stats();
        s.note_own_sent();
        s.check_interval(59_999);
        assert_eq!(s.interval().own_requests_sent, 1);
    }

    #[test]
    fn test_failure_rates() {
        let mut c = BusCounters::default();
        assert_eq!(c.own_failure_rate(), 0.0);
        c.own_requests_success = 95;
        c.own_requests_failed = 5;
        assert!((c.own_failure_rate() - 0.05).abs() < 1e-6);

        c.other_responses_seen = 8;
        c.other_exceptions_seen = 2;
        assert!((c.other_failure_rate() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_idle_percent() {
        let mut c = BusCounters::default();
        assert_eq!(c.bus_idle_percent(), 100.0);
        c.total_time_us = 1_000_000;
        c.own_active_time_us = 150_000;
        c.other_active_time_us = 100_000;
        assert!((c.bus_idle_percent() - 75.0).abs() < 0.01);
        assert!((c.bus_busy_percent() - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_active_time_attribution() {
        let mut s = stats();
        s.start_active(true, 1000);
        s.start_active(false, 2000); // no-op, window already open
        s.end_active(5000);
        assert_eq!(s.cumulative().own_active_time_us, 4000);
        assert_eq!(s.cumulative().other_active_time_us, 0);

        s.start_active(false, 10_000);
        s.end_active(11_000);
        assert_eq!(s.cumulative().other_active_time_us, 1000);
    }

    #[test]
    fn test_total_time_sampling() {
        let mut s = stats();
        s.sample_total_time(1000); // first sample only arms
        s.sample_total_time(4000);
        assert_eq!(s.cumulative().total_time_us, 3000);
    }
}
