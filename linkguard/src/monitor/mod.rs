//! Access point client reachability.
//!
//! One monitoring cycle takes a fresh snapshot of the associated clients,
//! resolves each one's leased address and probes it. The first client that
//! fails to answer ends the cycle: one failure is enough to trigger
//! recovery, so probing the rest would only delay it.
//!
//! A cycle that cannot be carried out at all (the access point can't be
//! queried, the lease table can't be read, the prober is broken) is
//! *indeterminate*. It never triggers recovery.

mod probe;

pub use probe::{ping_bound, PingProber, Prober};

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crate::access_point::AccessPoint;
use crate::tracing::prelude::*;
use crate::types::MacAddr;

/// Result of one monitoring cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Nobody is associated.
    NoClients,
    /// Every probed client answered. Clients without a lease are skipped.
    Reachable { probed: usize, unresolved: usize },
    /// A client failed to answer.
    Unreachable { client: MacAddr, address: Ipv4Addr },
    /// The cycle could not be carried out.
    Indeterminate { reason: String },
}

impl CycleOutcome {
    pub fn needs_recovery(&self) -> bool {
        matches!(self, CycleOutcome::Unreachable { .. })
    }
}

pub struct ReachabilityMonitor {
    access_point: Arc<dyn AccessPoint>,
    prober: Arc<dyn Prober>,
    probe_timeout: Duration,
    max_clients: usize,
}

impl ReachabilityMonitor {
    pub fn new(
        access_point: Arc<dyn AccessPoint>,
        prober: Arc<dyn Prober>,
        probe_timeout: Duration,
        max_clients: usize,
    ) -> Self {
        Self {
            access_point,
            prober,
            probe_timeout,
            max_clients,
        }
    }

    /// Run one monitoring cycle.
    pub async fn check(&self) -> CycleOutcome {
        let clients = match self.access_point.list_associated_clients().await {
            Ok(clients) => clients,
            Err(e) => {
                warn!(error = %e, "Cannot list access point clients");
                return CycleOutcome::Indeterminate {
                    reason: e.to_string(),
                };
            }
        };

        if clients.is_empty() {
            trace!("No associated clients");
            return CycleOutcome::NoClients;
        }
        if clients.len() > self.max_clients {
            warn!(
                associated = clients.len(),
                max = self.max_clients,
                "More clients than expected, probing the first ones only"
            );
        }

        let mut probed = 0;
        let mut unresolved = 0;
        for record in clients.iter().take(self.max_clients) {
            let client = record.hardware_address;
            let address = match self.access_point.resolve_lease_address(&client).await {
                Ok(Some(address)) => address,
                Ok(None) => {
                    debug!(%client, "Client has no lease, skipping");
                    unresolved += 1;
                    continue;
                }
                Err(e) => {
                    warn!(%client, error = %e, "Cannot resolve client lease");
                    return CycleOutcome::Indeterminate {
                        reason: e.to_string(),
                    };
                }
            };

            match self.prober.probe(address, self.probe_timeout).await {
                Ok(true) => {
                    trace!(%client, %address, "Client reachable");
                    probed += 1;
                }
                Ok(false) => {
                    warn!(%client, %address, "Client unreachable");
                    return CycleOutcome::Unreachable { client, address };
                }
                Err(e) => {
                    warn!(%client, %address, error = %e, "Probe failed to run");
                    return CycleOutcome::Indeterminate {
                        reason: e.to_string(),
                    };
                }
            }
        }

        CycleOutcome::Reachable { probed, unresolved }
    }
}
