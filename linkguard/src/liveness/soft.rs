//! Software liveness timer.
//!
//! Stands in for a hardware watchdog on systems without one. A separate
//! task watches the deadline; if it passes without a confirmation the trip
//! handler runs, which in production aborts the process so that the
//! service manager restarts it.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::LivenessTimer;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

struct Shared {
    deadline: Mutex<Option<Instant>>,
    changed: Notify,
}

impl Shared {
    fn set_deadline(&self, deadline: Option<Instant>) {
        *self.deadline.lock() = deadline;
        self.changed.notify_one();
    }
}

/// The confirming half, owned by the supervisor.
///
/// Dropping it without [`disarm`](LivenessTimer::disarm) leaves the
/// deadline in place, so a supervisor task that dies still trips.
pub struct SoftWatchdog {
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

/// The watching half; run it on its own task.
pub struct SoftWatchdogMonitor {
    shared: Arc<Shared>,
}

impl SoftWatchdog {
    pub fn new() -> (Self, SoftWatchdogMonitor) {
        let shared = Arc::new(Shared {
            deadline: Mutex::new(None),
            changed: Notify::new(),
        });
        (
            Self {
                shared: shared.clone(),
                timeout: None,
            },
            SoftWatchdogMonitor { shared },
        )
    }
}

impl LivenessTimer for SoftWatchdog {
    fn configure(&mut self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::Liveness("timeout must be non-zero".into()));
        }
        self.timeout = Some(timeout);
        self.shared.set_deadline(Some(Instant::now() + timeout));
        Ok(())
    }

    fn confirm(&mut self) -> Result<()> {
        let timeout = self
            .timeout
            .ok_or_else(|| Error::Liveness("software watchdog not configured".into()))?;
        self.shared.set_deadline(Some(Instant::now() + timeout));
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        self.timeout = None;
        self.shared.set_deadline(None);
        Ok(())
    }
}

impl SoftWatchdogMonitor {
    /// Watch the deadline until it is missed or `running` is cancelled.
    pub async fn run<F>(self, on_trip: F, running: CancellationToken)
    where
        F: FnOnce() + Send,
    {
        loop {
            let changed = self.shared.changed.notified();
            let deadline = *self.shared.deadline.lock();

            let Some(deadline) = deadline else {
                tokio::select! {
                    _ = running.cancelled() => return,
                    _ = changed => {}
                }
                continue;
            };

            tokio::select! {
                _ = running.cancelled() => return,
                _ = changed => {}
                _ = time::sleep_until(deadline) => {
                    let missed = self
                        .shared
                        .deadline
                        .lock()
                        .is_some_and(|d| d <= Instant::now());
                    if missed {
                        error!("Liveness deadline missed");
                        on_trip();
                        return;
                    }
                }
            }
        }
    }
}

/// Trip handler for production: there is nothing sensible left to do.
pub fn abort_process() {
    error!("Supervisor is unresponsive, aborting");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn start(timeout: Duration) -> (SoftWatchdog, Arc<AtomicBool>, CancellationToken) {
        let (mut watchdog, monitor) = SoftWatchdog::new();
        watchdog.configure(timeout).unwrap();
        let tripped = Arc::new(AtomicBool::new(false));
        let flag = tripped.clone();
        let running = CancellationToken::new();
        tokio::spawn(monitor.run(move || flag.store(true, Ordering::SeqCst), running.clone()));
        (watchdog, tripped, running)
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_confirmation_never_trips() {
        let (mut watchdog, tripped, _running) = start(Duration::from_secs(10));
        for _ in 0..60 {
            time::sleep(Duration::from_secs(5)).await;
            watchdog.confirm().unwrap();
        }
        assert!(!tripped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_deadline_trips() {
        let (mut watchdog, tripped, _running) = start(Duration::from_secs(10));
        time::sleep(Duration::from_secs(5)).await;
        watchdog.confirm().unwrap();

        time::sleep(Duration::from_secs(9)).await;
        assert!(!tripped.load(Ordering::SeqCst));
        time::sleep(Duration::from_secs(2)).await;
        assert!(tripped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_trips() {
        let (mut watchdog, tripped, _running) = start(Duration::from_secs(10));
        watchdog.disarm().unwrap();
        time::sleep(Duration::from_secs(60)).await;
        assert!(!tripped.load(Ordering::SeqCst));
        assert!(watchdog.confirm().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_without_disarm_still_trips() {
        let (watchdog, tripped, _running) = start(Duration::from_secs(10));
        drop(watchdog);
        time::sleep(Duration::from_secs(11)).await;
        assert!(tripped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let (mut watchdog, _monitor) = SoftWatchdog::new();
        assert!(watchdog.configure(Duration::ZERO).is_err());
    }
}
