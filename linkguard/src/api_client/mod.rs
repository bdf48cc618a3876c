//! API client library.
//!
//! Rust client for the supervisor's HTTP status API, used by the CLI.

use anyhow::{Context, Result};
use reqwest::Client;

use crate::api::v1::{HealthResponse, RemoteReportResponse};
use crate::link::LinkSnapshot;

pub const DEFAULT_URL: &str = "http://127.0.0.1:8080";

pub struct ApiClient {
    base: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base, path)
    }

    pub async fn link(&self) -> Result<LinkSnapshot> {
        self.get("/link").await
    }

    pub async fn link_up(&self) -> Result<bool> {
        self.get("/link/up").await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/health").await
    }

    /// Forward a raw remote reachability payload.
    pub async fn report_remote(&self, payload: &str) -> Result<RemoteReportResponse> {
        let url = self.url("/telemetry/remote");
        let response = self
            .http
            .put(&url)
            .body(payload.to_string())
            .send()
            .await
            .with_context(|| format!("PUT {}", url))?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{self, AppState};
    use crate::link::{LinkSnapshot, LinkState, LinkStatus};
    use crate::monitor::CycleOutcome;
    use crate::presentation::{DisplayState, Presentation};
    use crate::recovery::CycleReport;
    use crate::telemetry::{SuppressionState, TelemetryState};
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    fn established() -> LinkSnapshot {
        LinkSnapshot {
            state: LinkState::Established,
            address: Some(Ipv4Addr::new(10, 64, 64, 2)),
            gateway: Some(Ipv4Addr::new(10, 64, 64, 1)),
            netmask: Some(Ipv4Addr::new(255, 255, 255, 255)),
            backoff_secs: 2,
            consecutive_failures: 0,
        }
    }

    struct Server {
        client: ApiClient,
        display: Arc<DisplayState>,
        cycles: watch::Sender<Option<CycleReport>>,
        running: CancellationToken,
        _link: watch::Sender<LinkSnapshot>,
    }

    async fn start(snapshot: LinkSnapshot) -> Server {
        let (link_tx, link_rx) = watch::channel(snapshot);
        let (cycles, cycles_rx) = watch::channel(None);
        let display = Arc::new(DisplayState::new());
        let state = AppState {
            link: LinkStatus::new(link_rx),
            telemetry: Arc::new(TelemetryState::new(Duration::from_secs(30))),
            display: display.clone(),
            cycles: cycles_rx,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = CancellationToken::new();
        tokio::spawn(api::serve(listener, state, running.clone()));

        Server {
            client: ApiClient::new(format!("http://{}/", addr)),
            display,
            cycles,
            running,
            _link: link_tx,
        }
    }

    #[tokio::test]
    async fn test_link_endpoints() {
        let server = start(established()).await;
        assert_eq!(server.client.link().await.unwrap(), established());
        assert!(server.client.link_up().await.unwrap());
        server.running.cancel();
    }

    #[tokio::test]
    async fn test_remote_report_roundtrip() {
        let server = start(established()).await;

        let reply = server.client.report_remote("ONLINE").await.unwrap();
        assert_eq!(reply.state, SuppressionState::Online);
        assert_eq!(server.client.health().await.unwrap().remote, SuppressionState::Online);

        let reply = server.client.report_remote("garbage").await.unwrap();
        assert_eq!(reply.state, SuppressionState::Unknown);
        server.running.cancel();
    }

    #[tokio::test]
    async fn test_health_reports_last_cycle() {
        let server = start(LinkSnapshot {
            state: LinkState::Faulted,
            address: None,
            gateway: None,
            netmask: None,
            backoff_secs: 8,
            consecutive_failures: 3,
        })
        .await;

        let health = server.client.health().await.unwrap();
        assert!(!health.link_up);
        assert_eq!(health.last_cycle, None);
        assert_eq!(health.remote, SuppressionState::Unknown);

        let report = CycleReport::Checked {
            outcome: CycleOutcome::Reachable {
                probed: 2,
                unresolved: 1,
            },
            recovery_started: false,
        };
        server.cycles.send_replace(Some(report.clone()));
        server.display.reset_idle();

        let health = server.client.health().await.unwrap();
        assert_eq!(health.last_cycle, Some(report));
        assert_eq!(health.link.consecutive_failures, 3);
        assert_eq!(health.display.recoveries, 1);
        server.running.cancel();
    }
}
