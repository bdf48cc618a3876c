//! Liveness supervision.
//!
//! The supervisor task wakes once per period, confirms liveness to a
//! watchdog, then runs one monitoring-and-recovery cycle. If the task ever
//! stops coming around, confirmations stop and the watchdog resets the
//! system.
//!
//! Confirmation happens before the cycle so that a slow cycle can't starve
//! the watchdog, and every cycle is cut off at a budget well inside the
//! period. A cycle that overruns is treated as indeterminate.
//!
//! ```text
//!  tick ──► confirm() ──► run_cycle() ──► publish report
//!   ▲                      (≤ budget)          │
//!   └──────────────── period ──────────────────┘
//! ```

mod devfs;
mod soft;

pub use devfs::DevWatchdog;
pub use soft::{abort_process, SoftWatchdog, SoftWatchdogMonitor};

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::LivenessConfig;
use crate::error::Result;
use crate::monitor::CycleOutcome;
use crate::recovery::{CycleReport, RecoveryCoordinator};
use crate::tracing::prelude::*;

/// A timer that resets the system unless confirmed often enough.
pub trait LivenessTimer: Send {
    /// Arm the timer with the given timeout.
    fn configure(&mut self, timeout: Duration) -> Result<()>;

    /// Push the deadline out by one timeout.
    fn confirm(&mut self) -> Result<()>;

    /// Stop the timer for an orderly shutdown.
    fn disarm(&mut self) -> Result<()>;
}

pub struct LivenessSupervisor {
    timer: Box<dyn LivenessTimer>,
    coordinator: RecoveryCoordinator,
    period: Duration,
    cycle_budget: Duration,
    reports: watch::Sender<Option<CycleReport>>,
}

impl LivenessSupervisor {
    /// Arm the timer and set up the supervisor. Confirmation starts when
    /// [`run`](Self::run) is called.
    pub fn new(
        mut timer: Box<dyn LivenessTimer>,
        coordinator: RecoveryCoordinator,
        config: &LivenessConfig,
    ) -> Result<Self> {
        timer.configure(config.timeout())?;
        info!(
            period = ?config.period(),
            timeout = ?config.timeout(),
            "Liveness timer armed"
        );
        let (reports, _) = watch::channel(None);
        Ok(Self {
            timer,
            coordinator,
            period: config.period(),
            cycle_budget: config.cycle_budget(),
            reports,
        })
    }

    /// Latest cycle report, for the status API.
    pub fn reports(&self) -> watch::Receiver<Option<CycleReport>> {
        self.reports.subscribe()
    }

    pub async fn run(mut self, running: CancellationToken) -> Result<()> {
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = running.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.timer.confirm() {
                error!(error = %e, "Failed to confirm liveness");
            }

            let report = match time::timeout(self.cycle_budget, self.coordinator.run_cycle()).await
            {
                Ok(report) => report,
                Err(_) => {
                    warn!(budget = ?self.cycle_budget, "Monitoring cycle overran its budget");
                    CycleReport::Checked {
                        outcome: CycleOutcome::Indeterminate {
                            reason: "cycle exceeded its time budget".into(),
                        },
                        recovery_started: false,
                    }
                }
            };
            trace!(?report, "Cycle complete");
            self.reports.send_replace(Some(report));
        }

        self.coordinator.finish().await;
        self.timer.disarm()?;
        info!("Liveness timer disarmed");
        Ok(())
    }
}
