//! Configuration management for linkguard.
//!
//! Configuration is loaded from a TOML file. Every field has a default that
//! matches the reference appliance (USB serial PPP link, four-client access
//! point, 5 s supervisor period, 30 s hardware watchdog), so an absent file
//! or an empty section is valid. A handful of timing values can be
//! overridden from the environment for bench testing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::monitor::ping_bound;
use crate::tracing::prelude::*;
use crate::types::Backoff;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/linkguard/linkguard.toml";

/// Main configuration structure for the supervisor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub link: LinkConfig,
    pub access_point: AccessPointConfig,
    pub monitor: MonitorConfig,
    pub liveness: LivenessConfig,
    pub telemetry: TelemetryConfig,
    pub api: ApiConfig,
}

/// Serial transport and PPP link configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Serial device carrying the PPP byte stream
    pub serial_device: PathBuf,
    pub baud_rate: u32,
    /// Bounded wait for inbound bytes before the pump loops
    pub read_timeout_ms: u64,
    /// Bounded wait for an outbound write
    pub write_timeout_ms: u64,
    pub read_chunk_size: usize,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    /// A negotiation still pending after this long counts as a fault
    pub negotiation_timeout_secs: u64,
    /// pppd binary used as the link engine
    pub pppd: PathBuf,
    /// Negotiated MRU and MTU
    pub mtu: u16,
    /// Extra options appended to the pppd command line
    #[serde(default)]
    pub pppd_options: Vec<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            serial_device: PathBuf::from("/dev/ttyACM0"),
            baud_rate: 115_200,
            read_timeout_ms: 100,
            write_timeout_ms: 1000,
            read_chunk_size: 256,
            backoff_min_secs: 2,
            backoff_max_secs: 30,
            negotiation_timeout_secs: 60,
            pppd: PathBuf::from("/usr/sbin/pppd"),
            mtu: 512,
            pppd_options: Vec::new(),
        }
    }
}

impl LinkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.backoff_min_secs),
            Duration::from_secs(self.backoff_max_secs),
        )
    }
}

/// Access point collaborator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessPointConfig {
    /// Wireless interface the access point runs on
    pub interface: String,
    pub hostapd_cli: PathBuf,
    /// Command (program followed by arguments) that restarts the access point
    pub restart_command: Vec<String>,
    /// dnsmasq lease database
    pub lease_file: PathBuf,
    /// Maximum number of associated clients checked per cycle
    pub max_clients: usize,
    /// Bound on each collaborator query
    pub query_timeout_ms: u64,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            hostapd_cli: PathBuf::from("/usr/sbin/hostapd_cli"),
            restart_command: vec![
                "systemctl".to_string(),
                "restart".to_string(),
                "hostapd".to_string(),
            ],
            lease_file: PathBuf::from("/var/lib/misc/dnsmasq.leases"),
            max_clients: 4,
            query_timeout_ms: 1000,
        }
    }
}

impl AccessPointConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Client reachability monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Hard upper bound on one reachability probe
    pub probe_timeout_ms: u64,
    pub ping: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1000,
            ping: PathBuf::from("/bin/ping"),
        }
    }
}

impl MonitorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Which liveness timer backs the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogKind {
    /// Kernel watchdog device
    Device,
    /// In-process deadline that aborts the process when missed
    Software,
}

/// Liveness supervisor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LivenessConfig {
    pub period_secs: u64,
    /// Hardware timeout; must be comfortably larger than the period
    pub timeout_secs: u64,
    pub watchdog: WatchdogKind,
    pub device: PathBuf,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            period_secs: 5,
            timeout_secs: 30,
            watchdog: WatchdogKind::Device,
            device: PathBuf::from("/dev/watchdog"),
        }
    }
}

impl LivenessConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Upper bound on one monitoring cycle, so a stuck cycle still leaves
    /// room to confirm liveness on the next tick.
    pub fn cycle_budget(&self) -> Duration {
        self.period() / 2
    }
}

/// Telemetry collaborator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Remote connectivity reports older than this read as unknown
    pub stale_after_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { stale_after_secs: 30 }
    }
}

impl TelemetryConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Status API server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    /// Listen address
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the location given on the command line, in
    /// `LINKGUARD_CONFIG`, or the default path.
    ///
    /// A missing file at the default path yields the built-in defaults; an
    /// explicitly requested file must exist.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self> {
        let explicit = explicit.or_else(|| std::env::var_os("LINKGUARD_CONFIG").map(PathBuf::from));
        let mut config = match explicit {
            Some(path) => Self::load_from(&path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load_from(path)?
                } else {
                    info!(path = %path.display(), "No configuration file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&text)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_u64("LINKGUARD_LIVENESS_TIMEOUT_SECS") {
            self.liveness.timeout_secs = secs;
        }
        if let Some(ms) = env_u64("LINKGUARD_PROBE_TIMEOUT_MS") {
            self.monitor.probe_timeout_ms = ms;
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.liveness.period_secs == 0 {
            return Err(Error::Config("liveness period must be non-zero".into()));
        }
        if self.liveness.timeout_secs <= self.liveness.period_secs {
            return Err(Error::Config(format!(
                "liveness timeout ({}s) must exceed the period ({}s)",
                self.liveness.timeout_secs, self.liveness.period_secs
            )));
        }
        if self.link.backoff_min_secs == 0
            || self.link.backoff_min_secs > self.link.backoff_max_secs
        {
            return Err(Error::Config(format!(
                "backoff range {}s..{}s is invalid",
                self.link.backoff_min_secs, self.link.backoff_max_secs
            )));
        }
        // A dead client costs one client query plus one full probe; both
        // must fit the cycle or the failure is never confirmed.
        let worst_cycle =
            self.access_point.query_timeout() + ping_bound(self.monitor.probe_timeout());
        if worst_cycle >= self.liveness.cycle_budget() {
            return Err(Error::Config(format!(
                "query timeout ({}ms) plus probe bound ({}ms) must be below half the \
                 liveness period",
                self.access_point.query_timeout_ms,
                ping_bound(self.monitor.probe_timeout()).as_millis()
            )));
        }
        if self.link.negotiation_timeout_secs == 0 {
            return Err(Error::Config("negotiation timeout must be non-zero".into()));
        }
        if self.link.read_chunk_size == 0 {
            return Err(Error::Config("read chunk size must be non-zero".into()));
        }
        if self.access_point.restart_command.is_empty() {
            return Err(Error::Config("access point restart command is empty".into()));
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}
