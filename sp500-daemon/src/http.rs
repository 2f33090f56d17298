//! JSON HTTP surface.
//!
//! | Route                | Success                        |
//! |----------------------|--------------------------------|
//! | `GET /api/sp500`     | `{stocks, date, content}`      |
//! | `GET /api/qualitative` | `{stocks}`                   |
//! | `POST /api/subscribe`  | `{message}`                  |
//! | `GET /healthz`       | runtime status                 |
//!
//! Errors are `{error}` with a generic message; details only reach the log.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use sp500_core::{Snapshot, Stock};
use sp500_sync::{content_digest, QualitativeFilter, StoreError, SubscribeError, SyncPipeline};

/// Bound on any single request, read and write included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    pub filter: Arc<dyn QualitativeFilter>,
    pub backend: String,
    pub started_at: DateTime<Utc>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sp500", get(get_sp500))
        .route("/api/qualitative", get(get_qualitative))
        .route("/api/subscribe", post(subscribe))
        .route("/healthz", get(healthz))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
enum ApiError {
    Sp500Unavailable(StoreError),
    QualitativeUnavailable(StoreError),
    InvalidRequest(String),
    InvalidEmail(String),
    SubscribeFailed(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Sp500Unavailable(err) => {
                log_read_failure(&err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get S&P 500 data")
            }
            ApiError::QualitativeUnavailable(err) => {
                log_read_failure(&err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get qualitative stocks")
            }
            ApiError::InvalidRequest(detail) => {
                tracing::debug!(%detail, "rejected request body");
                (StatusCode::BAD_REQUEST, "Invalid request")
            }
            ApiError::InvalidEmail(detail) => {
                tracing::debug!(%detail, "rejected subscriber email");
                (StatusCode::BAD_REQUEST, "Invalid email address")
            }
            ApiError::SubscribeFailed(err) => {
                tracing::error!(error = %err, "subscriber write failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to subscribe")
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// A missing snapshot is reported like any other read failure.
fn log_read_failure(err: &StoreError) {
    if err.is_not_found() {
        tracing::warn!("no snapshot stored yet");
    } else {
        tracing::error!(error = %err, "snapshot read failed");
    }
}

async fn current_snapshot(state: &AppState) -> Result<Snapshot, StoreError> {
    state.pipeline.store().read().await
}

async fn get_sp500(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let snapshot = current_snapshot(&state)
        .await
        .map_err(ApiError::Sp500Unavailable)?;
    let body = serde_json::to_string(&snapshot)
        .map_err(|err| ApiError::Sp500Unavailable(StoreError::Json(err)))?;
    let etag = format!("\"{}\"", content_digest(&body));

    let mut response = if if_none_match(&headers).as_deref() == Some(etag.as_str()) {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        ([(header::CONTENT_TYPE, "application/json")], body).into_response()
    };
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

fn if_none_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

async fn get_qualitative(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = current_snapshot(&state)
        .await
        .map_err(ApiError::QualitativeUnavailable)?;
    let stocks: Vec<Stock> = state.filter.filter(snapshot.stocks);
    Ok(Json(json!({ "stocks": stocks })))
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    email: String,
}

async fn subscribe(
    State(state): State<AppState>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
    match state.pipeline.subscribers().add(&request.email).await {
        Ok(_) => Ok(Json(json!({ "message": "Successfully subscribed" }))),
        Err(SubscribeError::Invalid(err)) => Err(ApiError::InvalidEmail(err.to_string())),
        Err(SubscribeError::Storage(err)) => Err(ApiError::SubscribeFailed(err)),
    }
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "running": true,
        "state": state.pipeline.state(),
        "sync_in_flight": state.pipeline.is_running(),
        "backend": state.backend,
        "started_at": state.started_at,
        "last_run": state.pipeline.last_run(),
    }))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::NaiveDate;
    use tower::ServiceExt;

    use sp500_sync::{
        FetchError, Fetcher, LogNotifier, MemorySnapshotStore, MemorySubscriberRegistry,
        PassThrough, SnapshotStore, SubscriberRegistry,
    };

    use super::*;

    struct Unused;

    #[async_trait]
    impl Fetcher for Unused {
        async fn fetch_current_listing(&self) -> Result<String, FetchError> {
            Err(FetchError::MissingApiKey)
        }
    }

    fn state_with(store: Arc<MemorySnapshotStore>) -> AppState {
        let pipeline = SyncPipeline::new(
            Arc::new(Unused),
            store,
            Arc::new(MemorySubscriberRegistry::new()),
            Arc::new(LogNotifier::default()),
        );
        AppState {
            pipeline: Arc::new(pipeline),
            filter: Arc::new(PassThrough),
            backend: "memory".into(),
            started_at: Utc::now(),
        }
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    #[tokio::test]
    async fn reads_fail_generically_before_first_sync() {
        let app = build_router(state_with(Arc::new(MemorySnapshotStore::new())));

        let (status, _, body) = send(app.clone(), get_req("/api/sp500")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to get S&P 500 data");

        let (status, _, body) = send(app, get_req("/api/qualitative")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to get qualitative stocks");
    }

    #[tokio::test]
    async fn sp500_returns_snapshot_with_etag() {
        let store = Arc::new(MemorySnapshotStore::new());
        let snapshot = Snapshot::new("AAPL,MSFT", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        store.save(&snapshot).await.unwrap();
        let app = build_router(state_with(store));

        let (status, headers, body) = send(app.clone(), get_req("/api/sp500")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["date"], "2024-03-01");
        assert_eq!(body["content"], "AAPL,MSFT");
        assert!(body["stocks"].as_array().unwrap().is_empty());

        let etag = headers[header::ETAG].to_str().unwrap().to_string();
        let conditional = Request::get("/api/sp500")
            .header(header::IF_NONE_MATCH, &etag)
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(app, conditional).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert_eq!(headers[header::ETAG], etag.as_str());
    }

    #[tokio::test]
    async fn qualitative_returns_unfiltered_stocks() {
        let store = Arc::new(MemorySnapshotStore::new());
        let snapshot = Snapshot::new("raw", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .with_stocks(vec![Stock {
                ticker: "AAPL".into(),
                name: "Apple Inc.".into(),
                market_cap: 2.8e12,
            }]);
        store.save(&snapshot).await.unwrap();

        let (status, _, body) =
            send(build_router(state_with(store)), get_req("/api/qualitative")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stocks"][0]["ticker"], "AAPL");
        assert_eq!(body.as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subscribe_then_duplicate_both_succeed() {
        let state = state_with(Arc::new(MemorySnapshotStore::new()));
        let app = build_router(state.clone());

        for _ in 0..2 {
            let (status, _, body) =
                send(app.clone(), post_json("/api/subscribe", r#"{"email":"a@x.com"}"#)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["message"], "Successfully subscribed");
        }
        assert_eq!(state.pipeline.subscribers().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_email_is_rejected_and_registry_unchanged() {
        let state = state_with(Arc::new(MemorySnapshotStore::new()));
        let (status, _, body) = send(
            build_router(state.clone()),
            post_json("/api/subscribe", r#"{"email":""}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert!(state.pipeline.subscribers().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = build_router(state_with(Arc::new(MemorySnapshotStore::new())));
        for body in ["{not json", r#"{"mail":"a@x.com"}"#, "[]"] {
            let (status, _, json) = send(app.clone(), post_json("/api/subscribe", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body={body}");
            assert_eq!(json["error"], "Invalid request");
        }
    }

    #[tokio::test]
    async fn healthz_reports_idle_pipeline() {
        let app = build_router(state_with(Arc::new(MemorySnapshotStore::new())));
        let (status, _, body) = send(app, get_req("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], true);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["backend"], "memory");
        assert!(body["last_run"].is_null());
    }
}
