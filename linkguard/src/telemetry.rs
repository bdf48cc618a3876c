//! Remote-site reachability telemetry.
//!
//! A separate telemetry path tells us whether the remote site can currently
//! see us. While it reports online, the link is evidently working end to
//! end and client monitoring is skipped.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};
use tokio::time::Instant;

use crate::tracing::prelude::*;

/// Remote-site view of this system's reachability.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionState {
    #[strum(to_string = "online", serialize = "1", serialize = "true")]
    Online,
    #[strum(to_string = "offline", serialize = "0", serialize = "false")]
    Offline,
    #[strum(to_string = "unknown")]
    Unknown,
}

impl SuppressionState {
    /// Interpret a raw telemetry payload. Anything unrecognised is
    /// `Unknown`.
    pub fn from_payload(payload: &str) -> Self {
        payload.trim().parse().unwrap_or(SuppressionState::Unknown)
    }

    /// Only a positive online report suppresses monitoring.
    pub fn suppresses_monitoring(self) -> bool {
        self == SuppressionState::Online
    }
}

pub trait SuppressionSource: Send + Sync {
    fn suppression_state(&self) -> SuppressionState;
}

/// Last telemetry report, aged out after a stale window.
pub struct TelemetryState {
    last: Mutex<Option<(SuppressionState, Instant)>>,
    stale_after: Duration,
}

impl TelemetryState {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            stale_after,
        }
    }

    pub fn report(&self, state: SuppressionState) {
        let previous = self.last.lock().replace((state, Instant::now()));
        if previous.map(|(s, _)| s) != Some(state) {
            info!(state = %state, "Remote reachability changed");
        }
    }

    /// Record a raw payload and return how it was interpreted.
    pub fn report_payload(&self, payload: &str) -> SuppressionState {
        let state = SuppressionState::from_payload(payload);
        if state == SuppressionState::Unknown {
            debug!(payload = %payload.trim(), "Unrecognised telemetry payload");
        }
        self.report(state);
        state
    }
}

impl SuppressionSource for TelemetryState {
    fn suppression_state(&self) -> SuppressionState {
        match *self.last.lock() {
            Some((state, at)) if at.elapsed() <= self.stale_after => state,
            _ => SuppressionState::Unknown,
        }
    }
}
