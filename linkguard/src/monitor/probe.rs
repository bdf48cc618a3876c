//! Bounded reachability probes.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Process start-up allowance on top of the probe timeout.
const PROBE_SLACK: Duration = Duration::from_millis(250);

#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe one address, giving up after `timeout`.
    ///
    /// `Ok(false)` is a definite "no answer"; an error means the probe could
    /// not be carried out and says nothing about the client.
    async fn probe(&self, address: Ipv4Addr, timeout: Duration) -> Result<bool>;
}

/// Single ICMP echo through the system `ping`.
pub struct PingProber {
    program: PathBuf,
}

impl PingProber {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

/// `ping -W` only takes whole seconds.
fn wait_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

/// Longest a [`PingProber`] probe can take for a requested `timeout`.
pub fn ping_bound(timeout: Duration) -> Duration {
    Duration::from_secs(wait_secs(timeout)) + PROBE_SLACK
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, address: Ipv4Addr, timeout: Duration) -> Result<bool> {
        let wait = wait_secs(timeout);
        let mut child = Command::new(&self.program)
            .args(["-n", "-q", "-c", "1", "-W"])
            .arg(wait.to_string())
            .arg(address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        match time::timeout(ping_bound(timeout), child.wait()).await {
            Ok(status) => match status?.code() {
                Some(0) => Ok(true),
                Some(1) => Ok(false),
                code => Err(Error::Other(format!(
                    "ping {} exited abnormally ({:?})",
                    address, code
                ))),
            },
            Err(_) => {
                trace!(%address, "Probe overran, killing ping");
                if let Err(e) = child.kill().await {
                    debug!(%address, error = %e, "Could not kill overrunning ping");
                }
                Ok(false)
            }
        }
    }
}
