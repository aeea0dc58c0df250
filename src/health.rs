use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::coordination::CoordinationStore;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub node_id: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub store: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

async fn check_store(store: &dyn CoordinationStore) -> CheckResult {
    match store.ping().await {
        Ok(()) => CheckResult::healthy(),
        Err(e) => CheckResult::unhealthy(format!("PING failed: {e:#}")),
    }
}

/// Run every check and build the response body.
pub async fn check_health(store: &Arc<dyn CoordinationStore>, node_id: &str) -> HealthResponse {
    let checks = HealthChecks {
        store: check_store(store.as_ref()).await,
    };
    // Neither publishing nor deduplication works without the store.
    let status = if checks.store.ok {
        HealthStatus::Ok
    } else {
        HealthStatus::Unhealthy
    };
    HealthResponse {
        status,
        node_id: node_id.to_string(),
        checks,
    }
}

/// `GET /healthz` body.  Returns 200 when healthy, 503 otherwise.
pub async fn health_response(store: &Arc<dyn CoordinationStore>, node_id: &str) -> impl IntoResponse {
    let body = check_health(store, node_id).await;
    let http_status = match body.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(body))
}
