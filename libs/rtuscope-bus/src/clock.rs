//! Monotonic and wall-clock time sources
//!
//! All intra-frame decisions in the engine run on a monotonic microsecond
//! clock. Wall-clock epoch seconds are used only to label exported records
//! and may be unavailable (reported as zero) until time sync happens
//! elsewhere in the host system.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Epoch readings below this are treated as "time not yet valid".
/// 2020-09-13T12:26:40Z.
pub const EPOCH_VALID_MIN: u32 = 1_600_000_000;

/// Time source for the bus engine and device manager.
pub trait Clock: Send + Sync {
    /// Monotonic microseconds since some fixed origin (typically construction).
    fn uptime_us(&self) -> u64;

    /// Current Unix time in seconds, or 0 while wall time is unknown.
    fn epoch_secs(&self) -> u32;

    /// Monotonic milliseconds, derived.
    fn uptime_ms(&self) -> u64 {
        self.uptime_us() / 1000
    }

    /// Busy-wait for `us` microseconds. Implementations backed by an OS
    /// scheduler should override this with a real sleep.
    fn delay_us(&self, us: u64) {
        let deadline = self.uptime_us().saturating_add(us);
        while self.uptime_us() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Process clock: monotonic `Instant` plus the system wall clock.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
        })
    }
}

impl Clock for SystemClock {
    fn uptime_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn epoch_secs(&self) -> u32 {
        let now = chrono::Utc::now().timestamp();
        if now >= EPOCH_VALID_MIN as i64 {
            now as u32
        } else {
            0
        }
    }

    fn delay_us(&self, us: u64) {
        std::thread::sleep(std::time::Duration::from_micros(us));
    }
}

/// Exported timestamp value: uptime always, epoch/ISO only when real time
/// is known.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Timestamp {
    pub uptime_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<String>,
}

impl Timestamp {
    pub fn new(uptime_ms: u64, epoch_secs: u32) -> Self {
        let epoch = (epoch_secs >= EPOCH_VALID_MIN).then_some(epoch_secs);
        Self {
            uptime_ms,
            epoch,
            iso: epoch.and_then(iso_utc),
        }
    }
}

/// Format epoch seconds as `YYYY-MM-DDTHH:MM:SSZ`, or `None` when the
/// reading does not look like valid Unix time.
pub fn iso_utc(epoch_secs: u32) -> Option<String> {
    if epoch_secs < EPOCH_VALID_MIN {
        return None;
    }
    chrono::DateTime::from_timestamp(epoch_secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}
