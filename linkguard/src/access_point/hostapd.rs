//! Access point backed by hostapd and dnsmasq.

use async_trait::async_trait;
use std::ffi::OsStr;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;

use super::{AccessPoint, ClientRecord};
use crate::config::AccessPointConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use crate::types::MacAddr;

/// Restarting hostapd re-runs channel selection, which can take a while.
const RESTART_TIMEOUT: Duration = Duration::from_secs(30);

/// Queries hostapd through `hostapd_cli`, resolves leases from the dnsmasq
/// lease database, and restarts through a configured command.
pub struct HostapdAccessPoint {
    interface: String,
    hostapd_cli: PathBuf,
    restart_command: Vec<String>,
    lease_file: PathBuf,
    query_timeout: Duration,
}

impl HostapdAccessPoint {
    pub fn new(config: &AccessPointConfig) -> Self {
        Self {
            interface: config.interface.clone(),
            hostapd_cli: config.hostapd_cli.clone(),
            restart_command: config.restart_command.clone(),
            lease_file: config.lease_file.clone(),
            query_timeout: config.query_timeout(),
        }
    }

    fn interface_present(&self) -> bool {
        Path::new("/sys/class/net").join(&self.interface).exists()
    }
}

/// Run a command to completion within `limit`, capturing stdout.
///
/// The child is killed if the limit expires.
async fn run_bounded<I, S>(program: &Path, args: I, limit: Duration) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} did not finish within {:?}", program.display(), limit),
            ))
        })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::AccessPoint(format!(
            "{} failed ({}): {}",
            program.display(),
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `hostapd_cli list_sta` output: one station address per line, with
/// an occasional "Selected interface" banner to ignore.
fn parse_station_list(output: &str) -> Vec<ClientRecord> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<MacAddr>().ok())
        .map(|hardware_address| ClientRecord { hardware_address })
        .collect()
}

/// Look up a client in dnsmasq's lease database.
///
/// Each line reads `<expiry> <mac> <ip> <hostname> <client-id>`. Only IPv4
/// leases are considered; the last matching line wins.
fn find_lease(leases: &str, client: &MacAddr) -> Option<Ipv4Addr> {
    leases
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _expiry = fields.next()?;
            let mac = fields.next()?.parse::<MacAddr>().ok()?;
            let addr = fields.next()?.parse::<Ipv4Addr>().ok()?;
            (mac == *client).then_some(addr)
        })
        .last()
}

#[async_trait]
impl AccessPoint for HostapdAccessPoint {
    async fn restart_access_point(&self) -> Result<()> {
        let (program, args) = self
            .restart_command
            .split_first()
            .ok_or_else(|| Error::AccessPoint("restart command is empty".into()))?;
        info!(command = ?self.restart_command, "Restarting access point");
        run_bounded(Path::new(program), args, RESTART_TIMEOUT).await?;
        info!(interface = %self.interface, "Access point restarted");
        Ok(())
    }

    async fn list_associated_clients(&self) -> Result<Vec<ClientRecord>> {
        if !self.interface_present() {
            return Err(Error::AccessPoint(format!(
                "access point interface {} not found",
                self.interface
            )));
        }
        let output = run_bounded(
            &self.hostapd_cli,
            ["-i", self.interface.as_str(), "list_sta"],
            self.query_timeout,
        )
        .await?;
        let clients = parse_station_list(&output);
        trace!(count = clients.len(), "Listed associated clients");
        Ok(clients)
    }

    async fn resolve_lease_address(&self, client: &MacAddr) -> Result<Option<Ipv4Addr>> {
        let leases = tokio::fs::read_to_string(&self.lease_file).await.map_err(|e| {
            Error::AccessPoint(format!(
                "cannot read lease file {}: {}",
                self.lease_file.display(),
                e
            ))
        })?;
        Ok(find_lease(&leases, client))
    }
}
