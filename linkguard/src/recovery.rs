//! Access point recovery.
//!
//! Each supervisor cycle asks the coordinator to check on the clients. If
//! the remote site says we are reachable, nothing is checked. If a client
//! is unreachable, the access point is restarted and the status display
//! returns to idle.
//!
//! Restarting disassociates every client, so the cycle after a recovery
//! sees an empty list and does nothing. That is what ends a recovery
//! episode; no separate flag is kept. A restart runs in its own task and
//! at most one is ever outstanding: cycles that come around while it is
//! still running skip monitoring entirely.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::access_point::AccessPoint;
use crate::monitor::{CycleOutcome, ReachabilityMonitor};
use crate::presentation::Presentation;
use crate::telemetry::SuppressionSource;
use crate::tracing::prelude::*;

/// What one supervisor cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cycle", rename_all = "snake_case")]
pub enum CycleReport {
    /// Remote site reports us online; monitoring skipped.
    Suppressed,
    /// A restart from an earlier cycle is still running; monitoring skipped.
    RecoveryInFlight,
    /// Clients were checked.
    Checked {
        outcome: CycleOutcome,
        recovery_started: bool,
    },
}

pub struct RecoveryCoordinator {
    monitor: ReachabilityMonitor,
    access_point: Arc<dyn AccessPoint>,
    suppression: Arc<dyn SuppressionSource>,
    presentation: Arc<dyn Presentation>,
    in_flight: Option<JoinHandle<()>>,
}

impl RecoveryCoordinator {
    pub fn new(
        monitor: ReachabilityMonitor,
        access_point: Arc<dyn AccessPoint>,
        suppression: Arc<dyn SuppressionSource>,
        presentation: Arc<dyn Presentation>,
    ) -> Self {
        Self {
            monitor,
            access_point,
            suppression,
            presentation,
            in_flight: None,
        }
    }

    /// One monitoring-and-recovery cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        if self.in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Access point restart still in progress");
            return CycleReport::RecoveryInFlight;
        }
        self.in_flight = None;

        let suppression = self.suppression.suppression_state();
        if suppression.suppresses_monitoring() {
            trace!("Remote site reports online, skipping client checks");
            return CycleReport::Suppressed;
        }

        let outcome = self.monitor.check().await;
        let recovery_started = outcome.needs_recovery();
        if recovery_started {
            self.start_recovery(&outcome);
        }
        CycleReport::Checked {
            outcome,
            recovery_started,
        }
    }

    fn start_recovery(&mut self, cause: &CycleOutcome) {
        warn!(?cause, "Client unreachable, restarting access point");
        self.presentation.reset_idle();

        let access_point = self.access_point.clone();
        self.in_flight = Some(tokio::spawn(async move {
            if let Err(e) = access_point.restart_access_point().await {
                error!(error = %e, "Access point restart failed");
            }
        }));
    }

    /// Wait for an outstanding restart, if any.
    pub async fn finish(&mut self) {
        if let Some(task) = self.in_flight.take() {
            debug!("Waiting for access point restart to finish");
            if let Err(e) = task.await {
                error!(error = %e, "Access point restart task failed");
            }
        }
    }
}
