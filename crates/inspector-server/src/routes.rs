//! HTTP routes

use crate::websocket::watch_handler;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use inspector::InspectorService;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: Arc<InspectorService>,
}

impl AppState {
    pub fn new(service: Arc<InspectorService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    current_context: Option<String>,
    watch_sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        current_context: state.service.current_context().await,
        watch_sessions: state.service.watch_hub().session_count().await,
    })
}

/// Application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/watch", get(watch_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use cluster_client::MockConnector;
    use inspector::InspectorConfig;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn state(dir: &tempfile::TempDir) -> AppState {
        let config = InspectorConfig {
            kubeconfig_path: dir.path().join("kubeconfig"),
            service_account_dir: dir.path().join("serviceaccount"),
            ..Default::default()
        };
        AppState::new(Arc::new(InspectorService::new(
            config,
            Arc::new(MockConnector::new()),
        )))
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({"status": "ok", "currentContext": null, "watchSessions": 0})
        );
    }

    #[tokio::test]
    async fn test_watch_requires_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(&dir));

        let response = app
            .oneshot(Request::builder().uri("/api/watch").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
