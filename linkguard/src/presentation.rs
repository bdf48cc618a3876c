//! Local status presentation.
//!
//! Whatever shows status on the device (a panel, an LED, the status API)
//! is told when a recovery happened so it can return to its idle view.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use crate::tracing::prelude::*;

pub trait Presentation: Send + Sync {
    /// Return to the idle view after a recovery.
    fn reset_idle(&self);
}

/// What the status surface currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayStatus {
    /// Recoveries since the supervisor started.
    pub recoveries: u64,
    /// Wall clock time of the last recovery, seconds since the Unix epoch.
    pub last_recovery_unix: Option<u64>,
    /// Seconds spent in the idle view.
    pub idle_secs: u64,
}

struct DisplayInner {
    recoveries: u64,
    last_recovery_unix: Option<u64>,
    idle_since: Instant,
}

pub struct DisplayState {
    inner: Mutex<DisplayInner>,
}

impl DisplayState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DisplayInner {
                recoveries: 0,
                last_recovery_unix: None,
                idle_since: Instant::now(),
            }),
        }
    }

    pub fn status(&self) -> DisplayStatus {
        let inner = self.inner.lock();
        DisplayStatus {
            recoveries: inner.recoveries,
            last_recovery_unix: inner.last_recovery_unix,
            idle_secs: inner.idle_since.elapsed().as_secs(),
        }
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new()
    }
}

impl Presentation for DisplayState {
    fn reset_idle(&self) {
        let mut inner = self.inner.lock();
        inner.recoveries += 1;
        inner.last_recovery_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs());
        inner.idle_since = Instant::now();
        debug!(recoveries = inner.recoveries, "Display reset to idle");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_reset_idle_records_recovery() {
        let display = DisplayState::new();
        tokio::time::advance(Duration::from_secs(90)).await;

        let before = display.status();
        assert_eq!(before.recoveries, 0);
        assert_eq!(before.last_recovery_unix, None);
        assert_eq!(before.idle_secs, 90);

        display.reset_idle();
        let after = display.status();
        assert_eq!(after.recoveries, 1);
        assert!(after.last_recovery_unix.is_some());
        assert_eq!(after.idle_secs, 0);
    }
}
