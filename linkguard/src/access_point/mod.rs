//! Access point collaborator.
//!
//! The supervisor only needs three things from the access point: the list
//! of currently associated clients, the address each client leased, and a
//! way to restart the access point. Provisioning (SSID, credentials, the
//! configuration UI) lives elsewhere.

mod hostapd;

pub use hostapd::HostapdAccessPoint;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::error::Result;
use crate::types::MacAddr;

/// One currently associated wireless client.
///
/// Only ever held for the duration of one monitoring cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientRecord {
    pub hardware_address: MacAddr,
}

#[async_trait]
pub trait AccessPoint: Send + Sync {
    /// Restart the access point. Disassociates every client.
    async fn restart_access_point(&self) -> Result<()>;

    /// Point-in-time list of associated clients.
    ///
    /// An error means the list could not be obtained at all, which is not
    /// the same as an empty list.
    async fn list_associated_clients(&self) -> Result<Vec<ClientRecord>>;

    /// Address leased to a client, if any.
    ///
    /// `Ok(None)` means the client has no lease; an error means the lease
    /// table itself could not be read.
    async fn resolve_lease_address(&self, client: &MacAddr) -> Result<Option<Ipv4Addr>>;
}
