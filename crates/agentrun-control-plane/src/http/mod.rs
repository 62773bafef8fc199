//! HTTP server for the control plane.
//!
//! Provides endpoints for:
//! - Runs (`/v1/runs`, `/v1/runs/:run_id`)
//! - Plan decisions (`/v1/runs/:run_id/decision`)
//! - Event stream (`/v1/events`, SSE)
//! - Metrics (`/v1/metrics` JSON, `/metrics` Prometheus)
//! - Health check (`/health`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Dashboards are served from other origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // API routes
        .route("/v1/runs", post(handlers::start_run).get(handlers::list_runs))
        .route(
            "/v1/runs/:run_id",
            get(handlers::get_run).delete(handlers::delete_run),
        )
        .route("/v1/runs/:run_id/decision", post(handlers::submit_decision))
        .route("/v1/events", get(handlers::stream_events))
        .route("/v1/metrics", get(handlers::get_metrics))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use agentrun_core::{EventKind, RunId, RunStatus};

    use crate::agent::{OfflinePlanner, SimulatedExecutor};
    use crate::config::Config;
    use crate::store::RunStore;

    fn state() -> Arc<AppState> {
        AppState::new(
            Config::default(),
            RunStore::open_in_memory().unwrap(),
            Arc::new(OfflinePlanner),
            Arc::new(SimulatedExecutor::new(Duration::ZERO)),
        )
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_for_awaiting(state: &Arc<AppState>, run_id: &RunId) {
        for _ in 0..200 {
            if state.gate.is_awaiting(run_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {run_id} never awaited confirmation");
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_router(state()).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_start_run_is_accepted_and_readable() {
        let app = create_router(state());

        let response = app
            .clone()
            .oneshot(post_json("/v1/runs", json!({ "goal": "Build a parser", "max_steps": 2 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let run_id = body_json(response).await["run_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(get(&format!("/v1/runs/{run_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let detail = body_json(response).await;
        assert_eq!(detail["run"]["goal"], "Build a parser");
        assert!(detail["tasks"].is_array());
        assert_eq!(detail["events"][0]["type"], "run.start");
    }

    #[tokio::test]
    async fn test_blank_goal_is_rejected() {
        let response = create_router(state())
            .oneshot(post_json("/v1/runs", json!({ "goal": "  " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "missing_field");
        assert_eq!(body["error"]["param"], "goal");
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/runs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = create_router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "invalid_json");
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let response = create_router(state())
            .oneshot(get("/v1/runs/does-not-exist"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "run_not_found");
    }

    #[tokio::test]
    async fn test_decision_for_idle_run_conflicts() {
        let response = create_router(state())
            .oneshot(post_json("/v1/runs/idle/decision", json!({ "action": "approve" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_action_is_rejected() {
        let response = create_router(state())
            .oneshot(post_json("/v1/runs/idle/decision", json!({ "action": "maybe" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["param"], "action");
    }

    #[tokio::test]
    async fn test_cancel_through_decision_endpoint() {
        let state = state();
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json("/v1/runs", json!({ "goal": "Ship it", "mode": "confirm" })))
            .await
            .unwrap();
        let run_id = RunId::new(body_json(response).await["run_id"].as_str().unwrap());
        wait_for_awaiting(&state, &run_id).await;

        let response = app
            .oneshot(post_json(
                &format!("/v1/runs/{run_id}/decision"),
                json!({ "action": "cancel" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        for _ in 0..200 {
            let run = state.store.get_run(&run_id).await.unwrap().unwrap();
            if run.is_terminal() {
                assert_eq!(run.status, RunStatus::Cancelled);
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run was not cancelled");
    }

    #[tokio::test]
    async fn test_metrics_endpoints() {
        let app = create_router(state());

        let response = app.clone().oneshot(get("/v1/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["runs"]["started"], 0);
        assert_eq!(body["system"]["circuit_breaker_open"], false);

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("agentrun_llm_calls_total 0"));
    }

    #[tokio::test]
    async fn test_event_stream_replays_after_cursor() {
        let state = state();
        let run_id = RunId::new("sse");
        state
            .events
            .publish(&run_id, EventKind::RunError { error: "first".into() })
            .unwrap();
        state
            .events
            .publish(&run_id, EventKind::RunError { error: "second".into() })
            .unwrap();

        // The state owns the event log; keep it alive while the body streams.
        let response = create_router(state.clone())
            .oneshot(get("/v1/events?after=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let mut body = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let frame = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(frame.contains("event: run.error"));
        assert!(frame.contains("id: 2"));
        assert!(frame.contains("second"));
        assert!(!frame.contains("first"));
    }

    #[tokio::test]
    async fn test_last_event_id_header_resumes() {
        let state = state();
        let run_id = RunId::new("sse");
        for text in ["one", "two", "three"] {
            state
                .events
                .publish(&run_id, EventKind::RunError { error: text.into() })
                .unwrap();
        }

        let request = Request::builder()
            .uri("/v1/events")
            .header("Last-Event-ID", "2")
            .body(Body::empty())
            .unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();

        let mut body = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let frame = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(frame.contains("id: 3"));
        assert!(frame.contains("three"));
    }
}
