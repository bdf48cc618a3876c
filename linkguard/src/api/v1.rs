//! API version 1 endpoints.

use axum::{
    extract::{Json, State},
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::link::LinkSnapshot;
use crate::presentation::DisplayStatus;
use crate::recovery::CycleReport;
use crate::telemetry::{SuppressionSource, SuppressionState};

/// Overall supervisor health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub link: LinkSnapshot,
    pub link_up: bool,
    /// Remote reachability as currently believed (stale reports read as
    /// unknown)
    pub remote: SuppressionState,
    /// Most recent supervisor cycle, if one has run
    pub last_cycle: Option<CycleReport>,
    pub display: DisplayStatus,
}

/// Response to a remote reachability report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteReportResponse {
    /// How the payload was interpreted
    pub state: SuppressionState,
}

/// Link snapshot endpoint handler.
///
/// # Example
/// ```bash
/// curl http://localhost:8080/api/v1/link
/// ```
async fn link(State(state): State<AppState>) -> Json<LinkSnapshot> {
    Json(state.link.snapshot())
}

/// True while the link is established.
async fn link_up(State(state): State<AppState>) -> Json<bool> {
    Json(state.link.is_up())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let link = state.link.snapshot();
    let last_cycle = state.cycles.borrow().clone();
    Json(HealthResponse {
        link,
        link_up: state.link.is_up(),
        remote: state.telemetry.suppression_state(),
        last_cycle,
        display: state.display.status(),
    })
}

/*  Remote reachability report.

    The body is the raw telemetry payload: online/1/true or
    offline/0/false, case-insensitive. Anything else is recorded as unknown.

    curl -X PUT http://localhost:8080/api/v1/telemetry/remote -d online
*/
async fn report_remote(State(state): State<AppState>, body: String) -> Json<RemoteReportResponse> {
    Json(RemoteReportResponse {
        state: state.telemetry.report_payload(&body),
    })
}

/// Build the v1 API routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/link", get(link))
        .route("/link/up", get(link_up))
        .route("/health", get(health))
        .route("/telemetry/remote", put(report_remote))
        .with_state(state)
}
