//! Boot diagnostics
//!
//! Persistent boot-count and reset breadcrumbs, kept as an explicit
//! value initialized before [`crate::Core`] instead of static memory.
//! Stored as a small JSON document; absence or corruption starts a fresh
//! history rather than failing boot.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Reset breadcrumbs surviving across process restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootDiagnostics {
    pub boot_count: u32,
    #[serde(default)]
    pub last_reset_reason: String,
    /// Epoch seconds of the previous boot, 0 if wall time was unknown.
    #[serde(default)]
    pub last_boot_epoch: u32,
}

impl BootDiagnostics {
    /// Load previous diagnostics and record this boot. Never fails: a
    /// missing or corrupt file yields a fresh history.
    pub fn load_and_record(path: &Path, reason: &str, now_epoch: u32) -> Self {
        let mut diag = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(%err, "boot diagnostics corrupt, starting fresh");
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        diag.boot_count += 1;
        diag.last_reset_reason = reason.to_string();
        diag.last_boot_epoch = now_epoch;
        info!(
            boot_count = diag.boot_count,
            reason = %diag.last_reset_reason,
            "boot recorded"
        );
        diag
    }

    /// Persist the current state.
    pub fn store(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("rtuscope-boot-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn test_fresh_boot_starts_at_one() {
        let path = temp_path("fresh");
        let _ = std::fs::remove_file(&path);
        let diag = BootDiagnostics::load_and_record(&path, "power-on", 0);
        assert_eq!(diag.boot_count, 1);
        assert_eq!(diag.last_reset_reason, "power-on");
    }

    #[test]
    fn test_round_trip_increments() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        let first = BootDiagnostics::load_and_record(&path, "power-on", 1_700_000_000);
        first.store(&path).expect("store succeeds");

        let second = BootDiagnostics::load_and_record(&path, "watchdog", 1_700_000_100);
        assert_eq!(second.boot_count, 2);
        assert_eq!(second.last_reset_reason, "watchdog");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"{{{not json").expect("write test file");
        let diag = BootDiagnostics::load_and_record(&path, "brownout", 0);
        assert_eq!(diag.boot_count, 1);
        let _ = std::fs::remove_file(&path);
    }
}
