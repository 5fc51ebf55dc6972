//! API Routes
//!
//! All endpoints live under the configured mount path (`/cmm_api` by default):
//! - `POST /student-profile/`, `/ora2-report/`, `/problem-report/`, `/users-role-report/`
//! - `GET /get-all-task/` - status of a course's report tasks
//! - `GET /health` - liveness and database reachability
//! - `/reports/*` - report downloads when reports are stored on local disk,
//!   behind the same authentication as the report endpoints

pub mod health;
pub mod reports;
pub mod tasks;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::StorageProvider;
use crate::middleware::{apply_cors, authenticate, require_user, throttle};
use crate::models::AppState;

/// Create the main application router
///
/// Report and status endpoints run behind authenticate, require_user and
/// throttle, in that order.
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let protected = Router::new()
        .merge(reports::router())
        .merge(tasks::router())
        .route_layer(from_fn_with_state(state.clone(), throttle))
        .route_layer(from_fn(require_user))
        .route_layer(from_fn_with_state(state.clone(), authenticate));

    let mut api = Router::new().merge(protected).merge(health::router());
    if state.config.storage.provider == StorageProvider::Local {
        let downloads: Router = Router::new()
            .fallback_service(ServeDir::new(&state.config.storage.report_dir))
            .layer(from_fn(require_user))
            .layer(from_fn_with_state(state.clone(), authenticate));
        api = api.nest_service("/reports", downloads);
    }
    let api = api.with_state(state.clone());

    let mount = state.config.server.mount_path.trim_matches('/');
    let app = if mount.is_empty() {
        api
    } else {
        info!("Mounting API under /{}", mount);
        Router::new().nest(&format!("/{mount}"), api)
    };

    apply_cors(app.layer(TraceLayer::new_for_http()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;
    use crate::catalog::{CourseSummary, InMemoryCatalog};
    use crate::config::{
        AuthConfig, Config, DatabaseConfig, RedisConfig, ReportConfig, ServerConfig, StaticToken,
        StorageConfig, ThrottleConfig,
    };
    use crate::keys::CourseKey;
    use crate::middleware::{StaticTokenAuthenticator, UserThrottle};
    use crate::queue::{ChannelDispatcher, InMemoryJobRunner, TaskMessage};
    use crate::storage::{ArtifactStore, InMemoryArtifactStore, LocalReportStore};

    const COURSE: &str = "course-v1:mss+999+2021";

    struct TestApp {
        router: Router,
        _receiver: mpsc::UnboundedReceiver<TaskMessage>,
    }

    async fn test_app(rate: &str) -> TestApp {
        let storage = StorageConfig {
            provider: StorageProvider::Memory,
            report_dir: "/tmp/unused".into(),
            base_url: "/cmm_api/reports".into(),
        };
        test_app_with_storage(rate, storage, Arc::new(InMemoryArtifactStore::default())).await
    }

    async fn test_app_with_storage(
        rate: &str,
        storage: StorageConfig,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> TestApp {
        let config = Config {
            server: ServerConfig { port: 0, host: "127.0.0.1".into(), mount_path: "/cmm_api".into() },
            database: DatabaseConfig {
                url: None,
                max_connections: 1,
                min_connections: 1,
                seed_courses: Vec::new(),
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".into(),
                enabled: false,
                host_queue: "edx.lms.core.low".into(),
                service_queue: "cmm_api.low".into(),
            },
            storage,
            auth: AuthConfig {
                static_tokens: vec![StaticToken { token: "staff-token".into(), user_id: 1, username: "staff".into() }],
            },
            throttle: ThrottleConfig { rate: rate.parse().unwrap() },
            reports: ReportConfig::default(),
        };

        let catalog = InMemoryCatalog::default();
        catalog.insert(CourseSummary::new(CourseKey::parse(COURSE).unwrap())).await;
        let (dispatcher, receiver) = ChannelDispatcher::new();
        let state = AppState {
            throttle: Arc::new(UserThrottle::new(&config.throttle.rate)),
            authenticator: Arc::new(StaticTokenAuthenticator::new(&config.auth.static_tokens)),
            config: Arc::new(config),
            pool: None,
            catalog: Arc::new(catalog),
            runner: Arc::new(InMemoryJobRunner::new(Arc::new(dispatcher))),
            artifacts,
        };
        TestApp { router: create_router(state), _receiver: receiver }
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send_raw(app: &TestApp, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send_raw(app, req).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_submit_then_list_tasks() {
        let app = test_app("100/minute").await;
        let body = format!(r#"{{"course_id": "{COURSE}"}}"#);

        let (status, json) =
            send(&app, request("POST", "/cmm_api/student-profile/", Some("staff-token"), &body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "El reporte Perfil de estudiantes está siendo creado.");
        let task_id = json["task_id"].as_str().unwrap().to_string();

        let (status, json) =
            send(&app, request("GET", "/cmm_api/get-all-task/", Some("staff-token"), &body)).await;
        assert_eq!(status, StatusCode::OK);
        let tasks = json["list_task"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["task_type"], "cmmapi_profile_info_csv");
        assert_eq!(tasks[0]["task_id"], task_id.as_str());
        assert_eq!(tasks[0]["task_state"], "QUEUING");
    }

    #[tokio::test]
    async fn test_list_tasks_from_query_string() {
        let app = test_app("100/minute").await;
        let uri = format!("/cmm_api/get-all-task/?course_id={}", COURSE.replace('+', "%2B"));
        let (status, json) = send(&app, request("GET", &uri, Some("staff-token"), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["list_task"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_malformed_query_string() {
        let app = test_app("100/minute").await;
        let (status, json) = send(
            &app,
            request("GET", "/cmm_api/get-all-task/?course_id=a&course_id=b", Some("staff-token"), ""),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["detail"].as_str().unwrap().starts_with("Query parse error - "));
    }

    #[tokio::test]
    async fn test_body_course_wins_over_unparsable_query() {
        let app = test_app("100/minute").await;
        let body = format!(r#"{{"course_id": "{COURSE}"}}"#);
        let (status, json) = send(
            &app,
            request("GET", "/cmm_api/get-all-task/?course_id=a&course_id=b", Some("staff-token"), &body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["list_task"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_second_submission_reports_already_running() {
        let app = test_app("100/minute").await;
        let body = format!(r#"{{"course_id": "{COURSE}"}}"#);

        let (status, _) = send(&app, request("POST", "/cmm_api/ora2-report/", Some("staff-token"), &body)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, json) =
            send(&app, request("POST", "/cmm_api/ora2-report/", Some("staff-token"), &body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({ "status": "Already Running Task" }));
    }

    #[tokio::test]
    async fn test_invalid_block_id() {
        let app = test_app("100/minute").await;
        let (status, json) = send(
            &app,
            request("POST", "/cmm_api/problem-report/", Some("staff-token"), r#"{"block_id": "block-v1:test"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json.get("block_id").is_some());
    }

    #[tokio::test]
    async fn test_problem_report_accepts_block() {
        let app = test_app("100/minute").await;
        let body = r#"{"block_id": "block-v1:mss+999+2021+type@problem+block@aa11"}"#;
        let (status, json) =
            send(&app, request("POST", "/cmm_api/problem-report/", Some("staff-token"), body)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["task_id"].is_string());
    }

    #[tokio::test]
    async fn test_missing_and_unknown_course() {
        let app = test_app("100/minute").await;
        let (status, json) = send(&app, request("POST", "/cmm_api/users-role-report/", Some("staff-token"), "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["course_id"][0], "This field is required.");

        let (status, json) = send(
            &app,
            request(
                "POST",
                "/cmm_api/users-role-report/",
                Some("staff-token"),
                r#"{"course_id": "course-v1:other+1+2020"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["course_id"][0], "Invalid course_id.");
    }

    #[tokio::test]
    async fn test_anonymous_caller_is_rejected() {
        let app = test_app("100/minute").await;
        let body = format!(r#"{{"course_id": "{COURSE}"}}"#);
        for token in [None, Some("wrong-token")] {
            let (status, json) = send(&app, request("POST", "/cmm_api/ora2-report/", token, &body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["error"], "User dont have permission");
        }
    }

    #[tokio::test]
    async fn test_throttled_after_rate_is_spent() {
        let app = test_app("1/minute").await;
        let body = format!(r#"{{"course_id": "{COURSE}"}}"#);

        let (status, _) = send(&app, request("POST", "/cmm_api/ora2-report/", Some("staff-token"), &body)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, json) =
            send(&app, request("POST", "/cmm_api/student-profile/", Some("staff-token"), &body)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(json["detail"].as_str().unwrap().starts_with("Request was throttled."));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let app = test_app("100/minute").await;
        let (status, json) =
            send(&app, request("POST", "/cmm_api/ora2-report/", Some("staff-token"), "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["detail"].as_str().unwrap().starts_with("JSON parse error - "));
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = test_app("1/minute").await;
        let (status, json) = send(&app, request("GET", "/cmm_api/health", None, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["database"], "in-memory");
    }

    #[tokio::test]
    async fn test_report_downloads_require_a_user() {
        let report_dir = tempfile::TempDir::new().unwrap();
        let store = LocalReportStore::new(report_dir.path(), "/cmm_api/reports");
        let course = CourseKey::parse(COURSE).unwrap();
        store.store(&course, "mss_999_2021_Reporte_Roles.csv", b"Username,Email\n".to_vec()).await.unwrap();
        let url = store.links_for(&course).await.unwrap()[0].url.clone();

        let storage = StorageConfig {
            provider: StorageProvider::Local,
            report_dir: report_dir.path().to_string_lossy().into_owned(),
            base_url: "/cmm_api/reports".into(),
        };
        let app = test_app_with_storage("100/minute", storage, Arc::new(store)).await;

        for token in [None, Some("wrong-token")] {
            let (status, json) = send(&app, request("GET", &url, token, "")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json, serde_json::json!({ "error": "User dont have permission" }));
        }

        let (status, bytes) = send_raw(&app, request("GET", &url, Some("staff-token"), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"Username,Email\n");
    }
}
