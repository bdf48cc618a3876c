use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::{
    EventOutcome, LinkEngine, LinkEvent, LinkSession, LinkSnapshot, LinkState, LinkStatus,
    ReconnectDriver,
};
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use crate::types::Backoff;

/// Bound on a single call into the link engine.
const ENGINE_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests accepted by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    /// Start a connection attempt. A no-op unless Idle or Faulted.
    Connect,
}

/// Cloneable handle for requesting connects and reading link status.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: mpsc::Sender<LinkCommand>,
    status: LinkStatus,
}

impl LinkHandle {
    pub async fn connect(&self) -> Result<()> {
        self.commands
            .send(LinkCommand::Connect)
            .await
            .map_err(|_| Error::Link("link state machine is not running".into()))
    }

    pub fn status(&self) -> LinkStatus {
        self.status.clone()
    }
}

/// Single owner of the link session.
///
/// Engine status events and connect requests are serialized through this
/// task, so the session has exactly one writer. Every change is published
/// as a whole snapshot.
pub struct LinkStateMachine<E: ?Sized> {
    engine: Arc<E>,
    session: LinkSession,
    events: mpsc::Receiver<LinkEvent>,
    commands: mpsc::Receiver<LinkCommand>,
    reconnect: mpsc::Sender<Duration>,
    snapshot: watch::Sender<LinkSnapshot>,
    negotiation_timeout: Duration,
}

impl<E> LinkStateMachine<E>
where
    E: LinkEngine + ?Sized,
{
    /// Create the state machine, its reconnect driver, and a handle.
    ///
    /// `events` is the receiving end of the channel the engine reports
    /// status on. Both returned tasks must be spawned.
    pub fn new(
        engine: Arc<E>,
        backoff: Backoff,
        negotiation_timeout: Duration,
        events: mpsc::Receiver<LinkEvent>,
    ) -> (Self, ReconnectDriver, LinkHandle) {
        let session = LinkSession::new(backoff);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let (commands_tx, commands_rx) = mpsc::channel(8);
        // One pending reconnect at most: a faulted session ignores further
        // faults until it connects again.
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);

        let machine = Self {
            engine,
            session,
            events,
            commands: commands_rx,
            reconnect: reconnect_tx,
            snapshot: snapshot_tx,
            negotiation_timeout,
        };
        let driver = ReconnectDriver::new(reconnect_rx, commands_tx.clone());
        let handle = LinkHandle {
            commands: commands_tx,
            status: LinkStatus::new(snapshot_rx),
        };
        (machine, driver, handle)
    }

    /// Run the state machine, starting with an initial connect.
    pub async fn run(mut self, running: CancellationToken) {
        trace!("Link state machine started.");
        self.connect().await;

        let mut negotiation_deadline: Option<Instant> = None;
        loop {
            negotiation_deadline = match (self.session.state(), negotiation_deadline) {
                (LinkState::Connecting, Some(deadline)) => Some(deadline),
                (LinkState::Connecting, None) => Some(Instant::now() + self.negotiation_timeout),
                _ => None,
            };
            let negotiation_expired = async {
                match negotiation_deadline {
                    Some(deadline) => time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            // Events first, so a queued status never lands after a newer
            // connect request.
            tokio::select! {
                biased;
                _ = running.cancelled() => break,
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(command) = self.commands.recv() => match command {
                    LinkCommand::Connect => self.connect().await,
                },
                _ = negotiation_expired => {
                    self.fail_locally("negotiation timed out").await;
                }
            }
        }

        trace!("Link state machine stopped.");
    }

    async fn connect(&mut self) {
        if !self.session.begin_connect() {
            debug!(state = %self.session.state(), "Connect request ignored");
            return;
        }
        info!("Connecting link");
        self.publish();

        match time::timeout(ENGINE_CALL_TIMEOUT, self.engine.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.fail_locally(&format!("connect request failed: {e}")).await
            }
            Err(_) => self.fail_locally("connect request timed out").await,
        }
    }

    fn handle_event(&mut self, event: LinkEvent) {
        match self.session.on_event(&event) {
            EventOutcome::Ignored => {
                debug!(state = %self.session.state(), ?event, "Ignoring link event");
            }
            EventOutcome::Established => {
                let snapshot = self.session.snapshot();
                info!(
                    address = ?snapshot.address,
                    gateway = ?snapshot.gateway,
                    netmask = ?snapshot.netmask,
                    "Link established; routing between access point and link active"
                );
                self.publish();
            }
            EventOutcome::Faulted(delay) => {
                if let LinkEvent::Down { reason } = &event {
                    warn!(reason = %reason, "Link error or closed");
                }
                self.publish();
                self.schedule_reconnect(delay);
            }
        }
    }

    /// Fault the session without an engine report. The engine's attempt is
    /// abandoned so its eventual exit cannot fault the next attempt.
    async fn fail_locally(&mut self, reason: &str) {
        if let Some(delay) = self.session.fail() {
            warn!(reason, "Link faulted");
            if time::timeout(ENGINE_CALL_TIMEOUT, self.engine.disconnect())
                .await
                .is_err()
            {
                warn!("Timed out abandoning link attempt");
            }
            self.publish();
            self.schedule_reconnect(delay);
        }
    }

    fn schedule_reconnect(&self, delay: Duration) {
        if let Err(e) = self.reconnect.try_send(delay) {
            error!(error = %e, "Failed to schedule link reconnect");
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.session.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;

    /// Engine double that records connect requests and optionally answers
    /// each one with a scripted status event.
    struct ScriptedEngine {
        events: mpsc::Sender<LinkEvent>,
        reply: Mutex<Option<LinkEvent>>,
        connects: Mutex<Vec<Instant>>,
        disconnects: Mutex<usize>,
        fail_connect: bool,
    }

    impl ScriptedEngine {
        fn new(events: mpsc::Sender<LinkEvent>, reply: Option<LinkEvent>) -> Self {
            Self {
                events,
                reply: Mutex::new(reply),
                connects: Mutex::new(Vec::new()),
                disconnects: Mutex::new(0),
                fail_connect: false,
            }
        }

        fn connect_count(&self) -> usize {
            self.connects.lock().len()
        }

        fn gaps_secs(&self) -> Vec<u64> {
            let connects = self.connects.lock();
            connects
                .windows(2)
                .map(|w| round_secs(w[1] - w[0]))
                .collect()
        }
    }

    fn round_secs(d: Duration) -> u64 {
        ((d.as_millis() + 500) / 1000) as u64
    }

    #[async_trait]
    impl LinkEngine for ScriptedEngine {
        async fn connect(&self) -> Result<()> {
            self.connects.lock().push(Instant::now());
            if self.fail_connect {
                return Err(Error::Link("engine unavailable".into()));
            }
            if let Some(reply) = self.reply.lock().clone() {
                let _ = self.events.try_send(reply);
            }
            Ok(())
        }

        async fn input(&self, _chunk: &[u8]) {}

        async fn disconnect(&self) {
            *self.disconnects.lock() += 1;
        }
    }

    fn up() -> LinkEvent {
        LinkEvent::Up {
            address: Ipv4Addr::new(192, 168, 7, 2),
            peer: Ipv4Addr::new(192, 168, 7, 1),
            netmask: Ipv4Addr::BROADCAST,
        }
    }

    fn down() -> LinkEvent {
        LinkEvent::Down {
            reason: "LCP terminated".into(),
        }
    }

    struct Harness {
        engine: Arc<ScriptedEngine>,
        events: mpsc::Sender<LinkEvent>,
        handle: LinkHandle,
        running: CancellationToken,
    }

    fn start(reply: Option<LinkEvent>, fail_connect: bool) -> Harness {
        let (events_tx, events_rx) = mpsc::channel(16);
        let mut engine = ScriptedEngine::new(events_tx.clone(), reply);
        engine.fail_connect = fail_connect;
        let engine = Arc::new(engine);
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(30));
        let (machine, driver, handle) =
            LinkStateMachine::new(engine.clone(), backoff, Duration::from_secs(60), events_rx);
        let running = CancellationToken::new();
        tokio::spawn(machine.run(running.clone()));
        tokio::spawn(driver.run(running.clone()));
        Harness {
            engine,
            events: events_tx,
            handle,
            running,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_at_startup_and_establishes() {
        let h = start(Some(up()), false);
        time::sleep(Duration::from_millis(10)).await;

        let status = h.handle.status();
        assert!(status.is_up());
        let snap = status.snapshot();
        assert_eq!(snap.state, LinkState::Established);
        assert_eq!(snap.address, Some(Ipv4Addr::new(192, 168, 7, 2)));
        assert_eq!(snap.gateway, Some(Ipv4Addr::new(192, 168, 7, 1)));
        assert_eq!(h.engine.connect_count(), 1);
        h.running.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_requests_while_active_are_noops() {
        let h = start(None, false);
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.handle.status().snapshot().state, LinkState::Connecting);

        h.handle.connect().await.unwrap();
        h.handle.connect().await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.engine.connect_count(), 1);

        h.events.send(up()).await.unwrap();
        h.handle.connect().await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.engine.connect_count(), 1);
        assert!(h.handle.status().is_up());
        h.running.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_backoff_following_close() {
        let h = start(Some(up()), false);
        time::sleep(Duration::from_millis(10)).await;
        assert!(h.handle.status().is_up());

        h.events.send(down()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        let snap = h.handle.status().snapshot();
        assert_eq!(snap.state, LinkState::Faulted);
        assert_eq!(snap.address, None);
        assert_eq!(h.engine.connect_count(), 1);

        // Not before the backoff elapses...
        time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(h.engine.connect_count(), 1);

        // ...but shortly after.
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.engine.connect_count(), 2);
        assert!(h.handle.status().is_up());
        h.running.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failures_double_backoff() {
        let h = start(Some(down()), false);
        time::sleep(Duration::from_secs(40)).await;

        // 2 + 4 + 8 + 16 = 30, then capped at 30.
        assert_eq!(h.engine.gaps_secs(), vec![2, 4, 8, 16]);
        assert_eq!(h.handle.status().snapshot().consecutive_failures, 5);
        h.running.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_backoff() {
        let h = start(Some(down()), false);
        // Attempts at 0s, 2s and 6s fail; the next one is due at 14s.
        time::sleep(Duration::from_secs(7)).await;
        assert_eq!(h.engine.gaps_secs(), vec![2, 4]);

        *h.engine.reply.lock() = Some(up());
        time::sleep(Duration::from_secs(8)).await;
        assert!(h.handle.status().is_up());
        assert_eq!(h.handle.status().snapshot().backoff_secs, 2);

        *h.engine.reply.lock() = None;
        let closed_at = Instant::now();
        h.events.send(down()).await.unwrap();
        time::sleep(Duration::from_millis(2100)).await;

        let last_connect = *h.engine.connects.lock().last().unwrap();
        assert_eq!(round_secs(last_connect - closed_at), 2);
        assert_eq!(h.handle.status().snapshot().consecutive_failures, 1);
        h.running.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_negotiation_faults_and_retries() {
        let h = start(None, false);
        time::sleep(Duration::from_secs(59)).await;
        assert_eq!(h.handle.status().snapshot().state, LinkState::Connecting);
        assert_eq!(h.engine.connect_count(), 1);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.handle.status().snapshot().state, LinkState::Faulted);
        assert_eq!(*h.engine.disconnects.lock(), 1);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.engine.connect_count(), 2);
        assert_eq!(h.handle.status().snapshot().state, LinkState::Connecting);
        h.running.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_close_report_does_not_fault_retry() {
        let h = start(None, false);
        // Negotiation times out at 60s; the retry is due at 62s.
        time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.handle.status().snapshot().consecutive_failures, 1);

        // A late close report from the abandoned attempt, just before the retry.
        time::sleep(Duration::from_millis(999)).await;
        h.events.send(down()).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;

        let snap = h.handle.status().snapshot();
        assert_eq!(h.engine.connect_count(), 2);
        assert_eq!(snap.state, LinkState::Connecting);
        assert_eq!(snap.consecutive_failures, 1);
        assert_eq!(snap.backoff_secs, 4);
        h.running.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_request_is_a_link_fault() {
        let h = start(None, true);
        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.engine.connect_count(), 2);
        assert_eq!(h.handle.status().snapshot().state, LinkState::Faulted);
        h.running.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_observes_transitions() {
        let h = start(None, false);
        let mut status = h.handle.status();
        time::sleep(Duration::from_millis(10)).await;

        let mut seen = vec![status.changed().await.unwrap().state];
        h.events.send(up()).await.unwrap();
        seen.push(status.changed().await.unwrap().state);
        assert_eq!(seen, vec![LinkState::Connecting, LinkState::Established]);
        h.running.cancel();
    }
}
