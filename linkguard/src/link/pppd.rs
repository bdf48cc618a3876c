//! Link engine backed by `pppd`.
//!
//! pppd runs with `notty`, so its stdin and stdout carry the raw PPP byte
//! stream. The transport bridge feeds stdin through [`LinkEngine::input`],
//! and an output task forwards stdout to the serial channel through
//! [`Outbound`]. Status comes from pppd's log on stderr (`logfd 2`): the
//! local and remote address lines mark the link as up, and process exit
//! marks it down.
//!
//! Each `connect()` starts a fresh pppd session and kills the previous one;
//! `disconnect()` kills it without a replacement. Sessions are numbered so
//! that a superseded or abandoned session's exit is never reported as a
//! fault of the current one.

use async_trait::async_trait;
use regex::Regex;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::{LinkEngine, LinkEvent};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use crate::transport::Outbound;

/// Bound on handing one inbound chunk to pppd.
const INPUT_TIMEOUT: Duration = Duration::from_secs(1);

/// A point-to-point peer has a host netmask unless told otherwise.
const PEER_NETMASK: Ipv4Addr = Ipv4Addr::BROADCAST;

/// How to start the engine process.
#[derive(Debug, Clone)]
pub struct PppdConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl PppdConfig {
    /// pppd options for a serial link with no authentication, peer supplied
    /// DNS, a constrained MRU/MTU, and the link as the default route.
    pub fn from_link(config: &LinkConfig) -> Self {
        let mtu = config.mtu.to_string();
        let mut args: Vec<String> = [
            "notty", "nodetach", "logfd", "2", "noauth", "usepeerdns", "defaultroute", "mru",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(mtu.clone());
        args.push("mtu".to_string());
        args.push(mtu);
        args.extend(config.pppd_options.iter().cloned());
        Self {
            program: config.pppd.clone(),
            args,
        }
    }
}

/// What one pppd log line tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLine {
    LocalAddress(Ipv4Addr),
    RemoteAddress(Ipv4Addr),
    Other,
}

fn parse_log_line(line: &str) -> LogLine {
    static ADDRESS: OnceLock<Regex> = OnceLock::new();
    let re = ADDRESS.get_or_init(|| {
        Regex::new(r"^\s*(local|remote)\s+IP address\s+(\d{1,3}(?:\.\d{1,3}){3})\s*$")
            .expect("static regex is valid")
    });

    let Some(caps) = re.captures(line) else {
        return LogLine::Other;
    };
    let Ok(addr) = caps[2].parse::<Ipv4Addr>() else {
        return LogLine::Other;
    };
    match &caps[1] {
        "local" => LogLine::LocalAddress(addr),
        _ => LogLine::RemoteAddress(addr),
    }
}

struct Session {
    stdin: ChildStdin,
    cancel: CancellationToken,
}

/// pppd-backed [`LinkEngine`].
pub struct PppdEngine {
    config: PppdConfig,
    outbound: Arc<dyn Outbound>,
    events: mpsc::Sender<LinkEvent>,
    session: Mutex<Option<Session>>,
    generation: Arc<AtomicU64>,
}

impl PppdEngine {
    pub fn new(
        config: PppdConfig,
        outbound: Arc<dyn Outbound>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Self {
        Self {
            config,
            outbound,
            events,
            session: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Drop for PppdEngine {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

#[async_trait]
impl LinkEngine for PppdEngine {
    async fn connect(&self) -> Result<()> {
        let mut current = self.session.lock().await;
        if let Some(old) = current.take() {
            debug!("Stopping previous pppd session");
            old.cancel.cancel();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Link(format!(
                    "failed to start {}: {}",
                    self.config.program.display(),
                    e
                ))
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::Link("pppd stdio not captured".into()));
        };

        debug!(generation, pid = ?child.id(), "pppd session started");
        let cancel = CancellationToken::new();
        let watch = SessionWatch {
            generation,
            current: self.generation.clone(),
            events: self.events.clone(),
        };
        tokio::spawn(run_session(
            child,
            stdout,
            stderr,
            self.outbound.clone(),
            watch,
            cancel.clone(),
        ));

        *current = Some(Session { stdin, cancel });
        Ok(())
    }

    async fn input(&self, chunk: &[u8]) {
        let mut current = self.session.lock().await;
        let Some(session) = current.as_mut() else {
            trace!(bytes = chunk.len(), "No pppd session, dropping inbound bytes");
            return;
        };
        match time::timeout(INPUT_TIMEOUT, session.stdin.write_all(chunk)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "pppd stdin closed"),
            Err(_) => warn!(bytes = chunk.len(), "Timed out feeding pppd"),
        }
    }

    async fn disconnect(&self) {
        let mut current = self.session.lock().await;
        // Retire the generation first so the session's exit goes unreported.
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(old) = current.take() {
            debug!("Stopping abandoned pppd session");
            old.cancel.cancel();
        }
    }
}

/// Reports status for one session, but only while it is the current one.
struct SessionWatch {
    generation: u64,
    current: Arc<AtomicU64>,
    events: mpsc::Sender<LinkEvent>,
}

impl SessionWatch {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    async fn report(&self, event: LinkEvent) {
        if self.is_current() {
            let _ = self.events.send(event).await;
        } else {
            trace!(generation = self.generation, ?event, "Dropping event from superseded session");
        }
    }
}

async fn run_session(
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    outbound: Arc<dyn Outbound>,
    watch: SessionWatch,
    cancel: CancellationToken,
) {
    tokio::join!(
        forward_output(stdout, outbound),
        watch_log(stderr, &watch),
        watch_exit(child, &watch, cancel),
    );
}

/// Engine output to the serial channel. A short write is retried with the
/// remainder; a failed write drops the rest of the frame and leaves
/// recovery to PPP itself.
async fn forward_output(mut stdout: ChildStdout, outbound: Arc<dyn Outbound>) {
    let mut buf = [0u8; 512];
    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut sent = 0;
        while sent < n {
            let written = outbound.send_bytes(&buf[sent..n]).await;
            if written == 0 {
                debug!(dropped = n - sent, "Transport rejected engine output");
                break;
            }
            sent += written;
        }
    }
}

async fn watch_log(stderr: ChildStderr, watch: &SessionWatch) {
    let mut lines = BufReader::new(stderr).lines();
    let mut local = None;
    let mut remote = None;
    let mut reported = false;

    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "pppd", "{}", line);
        match parse_log_line(&line) {
            LogLine::LocalAddress(addr) => local = Some(addr),
            LogLine::RemoteAddress(addr) => remote = Some(addr),
            LogLine::Other => continue,
        }
        if let (false, Some(address), Some(peer)) = (reported, local, remote) {
            reported = true;
            watch
                .report(LinkEvent::Up {
                    address,
                    peer,
                    netmask: PEER_NETMASK,
                })
                .await;
        }
    }
}

async fn watch_exit(mut child: Child, watch: &SessionWatch, cancel: CancellationToken) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };

    let reason = match status {
        Ok(status) => format!("pppd exited: {}", status),
        Err(e) => format!("pppd wait failed: {}", e),
    };
    debug!(generation = watch.generation, reason = %reason, "pppd session ended");
    watch.report(LinkEvent::Down { reason }).await;
}
