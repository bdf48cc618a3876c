//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::access_point::{AccessPoint, ClientRecord};
use crate::error::{Error, Result};
use crate::monitor::Prober;
use crate::presentation::Presentation;
use crate::telemetry::{SuppressionSource, SuppressionState};
use crate::types::MacAddr;

pub fn client(n: u8) -> ClientRecord {
    ClientRecord {
        hardware_address: MacAddr::new([0x02, 0, 0, 0, 0, n]),
    }
}

pub fn lease(n: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 4, 10 + n)
}

/// Access point whose association list and lease table are set by the test.
/// Restarting disassociates every client, like the real thing.
#[derive(Default)]
pub struct FakeAccessPoint {
    pub clients: Mutex<Vec<ClientRecord>>,
    pub leases: Mutex<HashMap<MacAddr, Ipv4Addr>>,
    pub list_fails: AtomicBool,
    pub restarts: AtomicUsize,
    pub restart_delay: Mutex<Duration>,
}

impl FakeAccessPoint {
    /// Associate client `n` with its lease.
    pub fn associate(&self, n: u8) {
        let record = client(n);
        self.clients.lock().push(record);
        self.leases.lock().insert(record.hardware_address, lease(n));
    }

    /// Associate client `n` without any lease.
    pub fn associate_unleased(&self, n: u8) {
        self.clients.lock().push(client(n));
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessPoint for FakeAccessPoint {
    async fn restart_access_point(&self) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.restart_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.clients.lock().clear();
        Ok(())
    }

    async fn list_associated_clients(&self) -> Result<Vec<ClientRecord>> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(Error::AccessPoint("interface missing".into()));
        }
        Ok(self.clients.lock().clone())
    }

    async fn resolve_lease_address(&self, client: &MacAddr) -> Result<Option<Ipv4Addr>> {
        Ok(self.leases.lock().get(client).copied())
    }
}

/// Prober that answers from a set of dead addresses.
#[derive(Default)]
pub struct FakeProber {
    pub dead: Mutex<HashSet<Ipv4Addr>>,
    pub broken: AtomicBool,
    pub probed: Mutex<Vec<Ipv4Addr>>,
    pub delay: Mutex<Duration>,
}

impl FakeProber {
    pub fn kill(&self, address: Ipv4Addr) {
        self.dead.lock().insert(address);
    }

    pub fn probed(&self) -> Vec<Ipv4Addr> {
        self.probed.lock().clone()
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, address: Ipv4Addr, _timeout: Duration) -> Result<bool> {
        self.probed.lock().push(address);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Other("no ping".into()));
        }
        Ok(!self.dead.lock().contains(&address))
    }
}

pub struct FixedSuppression(pub Mutex<SuppressionState>);

impl FixedSuppression {
    pub fn new(state: SuppressionState) -> Self {
        Self(Mutex::new(state))
    }

    pub fn set(&self, state: SuppressionState) {
        *self.0.lock() = state;
    }
}

impl SuppressionSource for FixedSuppression {
    fn suppression_state(&self) -> SuppressionState {
        *self.0.lock()
    }
}

#[derive(Default)]
pub struct CountingPresentation {
    pub resets: AtomicUsize,
}

impl CountingPresentation {
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl Presentation for CountingPresentation {
    fn reset_idle(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}
