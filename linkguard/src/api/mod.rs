//! HTTP status API.
//!
//! Exposes the published link snapshot, the latest supervisor cycle and the
//! display status, and accepts remote reachability reports from the
//! telemetry path. Read-only apart from that one report endpoint.

pub mod v1;

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::link::LinkStatus;
use crate::presentation::DisplayState;
use crate::recovery::CycleReport;
use crate::telemetry::TelemetryState;
use crate::tracing::prelude::*;

/// Shared application state for API endpoints.
#[derive(Clone)]
pub struct AppState {
    pub link: LinkStatus,
    pub telemetry: Arc<TelemetryState>,
    pub display: Arc<DisplayState>,
    pub cycles: watch::Receiver<Option<CycleReport>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", v1::routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until `running` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    running: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Status API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(running.cancelled_owned())
        .await?;
    debug!("Status API stopped");
    Ok(())
}
