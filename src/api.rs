use std::collections::HashMap;
use std::sync::Arc;
use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use crate::config;
use crate::load_balancer::{BalanceError, HealthEvent};
use crate::metrics;
use crate::registry::{RegistryError, UpstreamRegistry};

pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RegistryError::UnknownService(_) => StatusCode::NOT_FOUND,
            RegistryError::Balance(BalanceError::NoBackendAvailable) => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::Balance(BalanceError::UnknownBackend(_)) => StatusCode::NOT_FOUND,
            RegistryError::Balance(_) | RegistryError::UnknownStrategy { .. } => StatusCode::BAD_REQUEST,
            RegistryError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// reload 时重新读取的文件名
#[derive(Debug, Clone)]
pub struct UpstreamsFile(pub String);

#[derive(Debug, Deserialize)]
pub struct HealthReport {
    pub addr: String,
    pub event: HealthEvent,
}

// 控制面路由
pub fn router(registry: Arc<UpstreamRegistry>, upstreams_file: String) -> Router {
    Router::new()
        .route("/", get(|| async { "Upstream balancer is running" }))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/upstreams", get(list_services))
        .route("/upstreams/:service", get(list_backends))
        .route("/upstreams/:service/next", get(next_backend))
        .route("/upstreams/:service/health", post(report_health))
        .route("/reload", post(reload))
        .layer(Extension(registry))
        .layer(Extension(UpstreamsFile(upstreams_file)))
}

async fn list_services(Extension(registry): Extension<Arc<UpstreamRegistry>>) -> Json<Vec<String>> {
    Json(registry.services())
}

async fn list_backends(
    Extension(registry): Extension<Arc<UpstreamRegistry>>,
    Path(service): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(registry.backends(&service)?))
}

// 带 key 时走 get，否则走 next
async fn next_backend(
    Extension(registry): Extension<Arc<UpstreamRegistry>>,
    Path(service): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, ApiError> {
    let addr = match params.get("key") {
        Some(key) => registry.get(&service, key)?,
        None => registry.next(&service)?,
    };
    Ok(addr)
}

async fn report_health(
    Extension(registry): Extension<Arc<UpstreamRegistry>>,
    Path(service): Path<String>,
    Json(report): Json<HealthReport>,
) -> Result<StatusCode, ApiError> {
    registry.report(&service, &report.addr, report.event)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reload(
    Extension(registry): Extension<Arc<UpstreamRegistry>>,
    Extension(UpstreamsFile(file)): Extension<UpstreamsFile>,
) -> Result<Json<Vec<String>>, ApiError> {
    let configs = config::load_upstreams(&file).map_err(RegistryError::from)?;
    registry.reload(&configs)?;
    info!(file = %file, "upstreams reloaded");
    Ok(Json(registry.services()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::Request;
    use tower::ServiceExt;
    use crate::config::parse_upstreams;
    use crate::load_balancer::LoadBalanceType;

    fn app() -> Router {
        let configs = parse_upstreams(
            r#"
            [[upstreams]]
            name = "user"
            backends = [{ addr = "a", weight = 2 }, { addr = "b", weight = 1 }]

            [[upstreams]]
            name = "session"
            strategy = "consistent-hash"
            backends = [{ addr = "s1" }, { addr = "s2" }]

            [[upstreams]]
            name = "empty"
            "#,
        )
        .unwrap();
        let registry = UpstreamRegistry::from_configs(&configs, LoadBalanceType::WeightRoundRobin).unwrap();
        router(Arc::new(registry), "does-not-exist".to_string())
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, String) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_next_follows_weights() {
        let app = app();
        let mut seq = Vec::new();
        for _ in 0..3 {
            let (status, body) = send(&app, get_req("/upstreams/user/next")).await;
            assert_eq!(status, StatusCode::OK);
            seq.push(body);
        }
        assert_eq!(seq, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_keyed_selection_is_stable() {
        let app = app();
        let (status, first) = send(&app, get_req("/upstreams/session/next?key=user-42")).await;
        assert_eq!(status, StatusCode::OK);
        for _ in 0..5 {
            let (_, again) = send(&app, get_req("/upstreams/session/next?key=user-42")).await;
            assert_eq!(again, first);
        }
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app();
        let (status, _) = send(&app, get_req("/upstreams/empty/next")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = send(&app, get_req("/upstreams/missing/next")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get_req("/upstreams/session/next?key=")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_endpoints() {
        let app = app();
        let (status, body) = send(&app, get_req("/upstreams")).await;
        assert_eq!(status, StatusCode::OK);
        let services: Vec<String> = serde_json::from_str(&body).unwrap();
        assert_eq!(services, vec!["empty", "session", "user"]);

        let (_, body) = send(&app, get_req("/upstreams/user")).await;
        let backends: Vec<String> = serde_json::from_str(&body).unwrap();
        assert_eq!(backends, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_health_report() {
        let app = app();
        let req = Request::builder()
            .method("POST")
            .uri("/upstreams/user/health")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"addr":"a","event":"down"}"#))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // a 被置零后第一轮由 b 胜出
        let (_, body) = send(&app, get_req("/upstreams/user/next")).await;
        assert_eq!(body, "b");

        let req = Request::builder()
            .method("POST")
            .uri("/upstreams/user/health")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"addr":"zzz","event":"failure"}"#))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reload_missing_file_keeps_registry() {
        let app = app();
        let req = Request::builder().method("POST").uri("/reload").body(Body::empty()).unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = send(&app, get_req("/upstreams/user/next")).await;
        assert_eq!(status, StatusCode::OK);
    }
}
