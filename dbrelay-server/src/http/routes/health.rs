//! Health check endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::db::pool::ping;
use crate::http::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub database: DatabaseHealth,
    pub relay: RelayHealth,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct RelayHealth {
    pub group: String,
    pub subscribers: usize,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let connected = ping(&state.pool).await;
    Json(HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        database: DatabaseHealth { connected },
        relay: RelayHealth {
            group: state.relay.group.clone(),
            subscribers: state.registry.member_count(&state.relay.group),
        },
    })
}

/// Health routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dbrelay_core::RelaySettings;
    use sqlx::postgres::PgPoolOptions;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::registry::SessionId;
    use crate::session::ChangeRegistry;

    #[tokio::test]
    async fn unreachable_database_reports_degraded() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        let registry = Arc::new(ChangeRegistry::new());
        let (tx, _rx) = mpsc::channel(1);
        registry.join("db_changes", SessionId::new(), tx);

        let state = Arc::new(AppState::new(pool, registry, RelaySettings::default()));
        let Json(body) = health(State(state)).await;

        assert_eq!(body.status, "degraded");
        assert!(!body.database.connected);
        assert_eq!(body.relay.group, "db_changes");
        assert_eq!(body.relay.subscribers, 1);
    }

    #[tokio::test]
    async fn health_route_serves_json() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        let state = Arc::new(AppState::new(
            pool,
            Arc::new(ChangeRegistry::new()),
            RelaySettings::default(),
        ));

        let response = router()
            .with_state(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["database"]["connected"], false);
        assert_eq!(json["relay"]["subscribers"], 0);
    }
}
