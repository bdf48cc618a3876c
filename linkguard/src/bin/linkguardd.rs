//! Link supervisor daemon.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use linkguard::access_point::{AccessPoint, HostapdAccessPoint};
use linkguard::api::{self, AppState};
use linkguard::config::{Config, WatchdogKind};
use linkguard::link::{LinkStateMachine, PppdConfig, PppdEngine};
use linkguard::liveness::{self, DevWatchdog, LivenessSupervisor, LivenessTimer, SoftWatchdog};
use linkguard::monitor::{PingProber, ReachabilityMonitor};
use linkguard::presentation::DisplayState;
use linkguard::recovery::RecoveryCoordinator;
use linkguard::telemetry::TelemetryState;
use linkguard::tracing::{self, prelude::*};
use linkguard::transport::{self, inbound_pump, TransportWriter};

#[derive(Parser, Debug)]
#[command(name = "linkguardd", about = "PPP link and access point supervisor")]
struct Cli {
    /// Configuration file (default: $LINKGUARD_CONFIG, then
    /// /etc/linkguard/linkguard.toml).
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();
    let cli = Cli::parse();

    let config = Config::load(cli.config).context("loading configuration")?;
    debug!(?config, "Configuration loaded");

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();

    // Link: serial transport <-> pppd, supervised by the state machine.
    let (reader, writer) = transport::open_serial(&config.link)?;
    let outbound = Arc::new(TransportWriter::new(writer, config.link.write_timeout()));
    let (events_tx, events_rx) = mpsc::channel(16);
    let engine = Arc::new(PppdEngine::new(
        PppdConfig::from_link(&config.link),
        outbound,
        events_tx,
    ));
    let (machine, driver, link) = LinkStateMachine::new(
        engine.clone(),
        config.link.backoff(),
        config.link.negotiation_timeout(),
        events_rx,
    );
    tracker.spawn(machine.run(running.clone()));
    tracker.spawn(driver.run(running.clone()));
    tracker.spawn({
        let engine = engine.clone();
        let read_timeout = config.link.read_timeout();
        let chunk_size = config.link.read_chunk_size;
        let running = running.clone();
        async move {
            let pumped =
                inbound_pump(reader, engine, read_timeout, chunk_size, running.clone()).await;
            if let Err(e) = pumped {
                error!(error = %e, "Serial transport lost");
                running.cancel();
            }
        }
    });

    // Client monitoring and recovery, driven by the liveness supervisor.
    let access_point: Arc<dyn AccessPoint> =
        Arc::new(HostapdAccessPoint::new(&config.access_point));
    let monitor = ReachabilityMonitor::new(
        access_point.clone(),
        Arc::new(PingProber::new(config.monitor.ping.clone())),
        config.monitor.probe_timeout(),
        config.access_point.max_clients,
    );
    let telemetry = Arc::new(TelemetryState::new(config.telemetry.stale_after()));
    let display = Arc::new(DisplayState::new());
    let coordinator =
        RecoveryCoordinator::new(monitor, access_point, telemetry.clone(), display.clone());

    let timer: Box<dyn LivenessTimer> = match config.liveness.watchdog {
        WatchdogKind::Device => Box::new(DevWatchdog::open(&config.liveness.device)?),
        WatchdogKind::Software => {
            let (watchdog, monitor) = SoftWatchdog::new();
            tracker.spawn(monitor.run(liveness::abort_process, running.clone()));
            Box::new(watchdog)
        }
    };
    let supervisor = LivenessSupervisor::new(timer, coordinator, &config.liveness)?;
    let cycles = supervisor.reports();
    tracker.spawn({
        let running = running.clone();
        async move {
            if let Err(e) = supervisor.run(running).await {
                error!(error = %e, "Liveness supervisor failed");
            }
        }
    });

    // Status API.
    let listener = TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("binding status API to {}", config.api.listen))?;
    let state = AppState {
        link: link.status(),
        telemetry,
        display,
        cycles,
    };
    tracker.spawn({
        let running = running.clone();
        async move {
            if let Err(e) = api::serve(listener, state, running).await {
                error!(error = %e, "Status API failed");
            }
        }
    });

    tracker.close();
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let fatal = tokio::select! {
        _ = sigint.recv() => false,
        _ = sigterm.recv() => false,
        _ = running.cancelled() => true,
    };

    trace!("Shutting down.");
    running.cancel();
    tracker.wait().await;
    drop(engine);
    info!("Exiting.");

    if fatal {
        anyhow::bail!("stopped after a fatal error");
    }
    Ok(())
}
