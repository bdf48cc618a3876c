//! The link session and its transition rules.

use std::net::Ipv4Addr;
use std::time::Duration;

use super::{LinkEvent, LinkSnapshot, LinkState};
use crate::types::Backoff;

/// The single point-to-point link slot.
///
/// Represents the slot rather than one attempt: it is created once and
/// lives for the whole run. Only the state machine task mutates it.
#[derive(Debug, Clone)]
pub struct LinkSession {
    state: LinkState,
    address: Option<Ipv4Addr>,
    peer: Option<Ipv4Addr>,
    netmask: Option<Ipv4Addr>,
    backoff: Backoff,
    consecutive_failures: u32,
}

/// What an engine event did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not valid in the current state; nothing changed.
    Ignored,
    Established,
    /// The link faulted; reconnect after the given delay.
    Faulted(Duration),
}

impl LinkSession {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: LinkState::Idle,
            address: None,
            peer: None,
            netmask: None,
            backoff,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Move to Connecting. Only valid from Idle or Faulted; returns false
    /// (and changes nothing) otherwise.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            LinkState::Idle | LinkState::Faulted => {
                self.state = LinkState::Connecting;
                true
            }
            LinkState::Connecting | LinkState::Established => false,
        }
    }

    /// Apply a status event from the engine.
    pub fn on_event(&mut self, event: &LinkEvent) -> EventOutcome {
        match (self.state, event) {
            (
                LinkState::Connecting,
                LinkEvent::Up {
                    address,
                    peer,
                    netmask,
                },
            ) => {
                self.state = LinkState::Established;
                self.address = Some(*address);
                self.peer = Some(*peer);
                self.netmask = Some(*netmask);
                self.backoff.on_success();
                self.consecutive_failures = 0;
                EventOutcome::Established
            }
            (LinkState::Connecting | LinkState::Established, LinkEvent::Down { .. }) => {
                EventOutcome::Faulted(self.fault())
            }
            _ => EventOutcome::Ignored,
        }
    }

    /// Fault the link from Connecting or Established for a reason the engine
    /// did not report itself (connect request failed, negotiation hung).
    pub fn fail(&mut self) -> Option<Duration> {
        match self.state {
            LinkState::Connecting | LinkState::Established => Some(self.fault()),
            LinkState::Idle | LinkState::Faulted => None,
        }
    }

    fn fault(&mut self) -> Duration {
        self.state = LinkState::Faulted;
        self.address = None;
        self.peer = None;
        self.netmask = None;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.backoff.on_failure()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state,
            address: self.address,
            gateway: self.peer,
            netmask: self.netmask,
            backoff_secs: self.backoff.current().as_secs(),
            consecutive_failures: self.consecutive_failures,
        }
    }
}
