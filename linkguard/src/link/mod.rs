//! Point-to-point link lifecycle.
//!
//! The link engine (PPP framing and negotiation) is an external component
//! consumed through a narrow interface: `connect()` starts a negotiation,
//! `input()` feeds it bytes from the transport, and status is reported back
//! as [`LinkEvent`]s on a channel. A single owner task, the
//! [`LinkStateMachine`], consumes those events and is the only writer of the
//! session state. Everyone else reads a published [`LinkSnapshot`] through a
//! [`LinkStatus`] handle.
//!
//! ```text
//!   serial --> inbound pump --> engine.input()
//!   engine --> Outbound::send_bytes() --> serial
//!   engine --> LinkEvent --> LinkStateMachine --> watch<LinkSnapshot>
//!                               |     ^
//!                        backoff|     |Connect
//!                               v     |
//!                           ReconnectDriver
//! ```

mod pppd;
mod reconnect;
mod session;
mod state_machine;

pub use pppd::{PppdConfig, PppdEngine};
pub use reconnect::ReconnectDriver;
pub use session::{EventOutcome, LinkSession};
pub use state_machine::{LinkCommand, LinkHandle, LinkStateMachine};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use strum::Display;
use tokio::sync::watch;

use crate::error::Result;

/// The external link engine.
#[async_trait]
pub trait LinkEngine: Send + Sync {
    /// Begin a connection attempt. The outcome arrives later as a
    /// [`LinkEvent`].
    async fn connect(&self) -> Result<()>;

    /// Feed bytes received from the transport, in receipt order.
    async fn input(&self, chunk: &[u8]);

    /// Abandon the current attempt. Nothing the abandoned session reports
    /// afterwards may reach the event channel.
    async fn disconnect(&self);
}

/// Status reported by the link engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Negotiation succeeded.
    Up {
        address: Ipv4Addr,
        peer: Ipv4Addr,
        netmask: Ipv4Addr,
    },
    /// Negotiation failed or the peer closed the link.
    Down { reason: String },
}

/// Lifecycle state of the link slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LinkState {
    Idle,
    Connecting,
    Established,
    Faulted,
}

/// Point-in-time copy of the link session, as published to readers.
///
/// Addresses are only present while the link is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub address: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    /// Delay before the next reconnect attempt after a failure
    pub backoff_secs: u64,
    /// Failures since the last successful negotiation
    pub consecutive_failures: u32,
}

/// Read-only view of the published link snapshot.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    rx: watch::Receiver<LinkSnapshot>,
}

impl LinkStatus {
    pub(crate) fn new(rx: watch::Receiver<LinkSnapshot>) -> Self {
        Self { rx }
    }

    /// Copy of the current snapshot. Never observes a half-updated session.
    pub fn snapshot(&self) -> LinkSnapshot {
        *self.rx.borrow()
    }

    pub fn is_up(&self) -> bool {
        self.rx.borrow().state == LinkState::Established
    }

    /// Wait until the published snapshot changes.
    pub async fn changed(&mut self) -> Option<LinkSnapshot> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
