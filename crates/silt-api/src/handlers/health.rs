//! Health check handlers for service monitoring.
//!
//! Provides liveness and readiness endpoints with a database connectivity
//! check for orchestration systems like Kubernetes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use silt_core::Storage;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when the health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some non-critical issues detected
    Degraded,
    /// Critical systems failing
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Database connectivity and basic query test
    pub database: ComponentHealth,
}

/// Health status for individual components.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Optional error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Component-level health status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Internal structure for database health check results.
struct DatabaseHealth {
    status: ComponentStatus,
    message: Option<String>,
}

/// Liveness check endpoint for orchestration probes.
///
/// Returns a simple response indicating the service process is alive.
/// This is a minimal check that doesn't test external dependencies,
/// focusing only on whether the HTTP server is responding.
#[instrument(name = "liveness_check")]
pub async fn liveness_check() -> Response {
    debug!("Performing liveness check");

    let response = serde_json::json!({
        "status": "alive",
        "timestamp": Utc::now(),
        "service": "silt-api"
    });

    (StatusCode::OK, Json(response)).into_response()
}

/// Readiness check endpoint for orchestration probes.
///
/// Verifies storage connectivity before reporting ready. Instances that
/// return 503 should be taken out of rotation until the database check
/// passes again.
#[instrument(name = "readiness_check", skip(app_state))]
pub async fn readiness_check(State(app_state): State<AppState>) -> Response {
    debug!("Performing readiness check");

    let timestamp = Utc::now();
    let start_time = std::time::Instant::now();
    let database = check_database_health(&app_state.storage).await;
    let db_duration = start_time.elapsed();

    let overall_status = match database.status {
        ComponentStatus::Up => HealthStatus::Healthy,
        ComponentStatus::Down => HealthStatus::Unhealthy,
    };

    let status_code = match overall_status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status: overall_status,
        timestamp,
        checks: HealthChecks {
            database: ComponentHealth {
                status: database.status,
                message: database.message,
                response_time_ms: u64::try_from(db_duration.as_millis()).unwrap_or(u64::MAX),
            },
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    debug!(
        status = ?response.status,
        db_status = ?response.checks.database.status,
        "Readiness check completed"
    );

    (status_code, Json(response)).into_response()
}

/// Checks database connectivity and health.
///
/// Executes a lightweight query to verify the database connection
/// is working properly. Does not perform expensive operations.
async fn check_database_health(storage: &Storage) -> DatabaseHealth {
    match storage.health_check().await {
        Ok(()) => {
            debug!("Database health check passed");
            DatabaseHealth { status: ComponentStatus::Up, message: None }
        },
        Err(e) => {
            error!("Database health check failed: {}", e);
            DatabaseHealth {
                status: ComponentStatus::Down,
                message: Some(format!("Database connection failed: {e}")),
            }
        },
    }
}
