use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::auth::{AuthSettings, require_auth, token_from_headers};
use super::drag::DragEvent;
use super::models::NewTask;
use super::session::BoardHandle;
use crate::errors::BoardError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub board: BoardHandle,
    pub ws_tx: broadcast::Sender<String>,
    pub auth: AuthSettings,
}

impl AppState {
    pub fn new(board: BoardHandle, auth: AuthSettings) -> Self {
        let ws_tx = board.events();
        Self { board, ws_tx, auth }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub task_id: String,
    pub column: String,
    pub status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragStartRequest {
    pub task_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragOverRequest {
    pub active_id: String,
    pub over_id: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    /// Map a board error, using `action` ("update task", ...) for failures
    /// the client cannot fix.
    fn from_board(err: BoardError, action: &str) -> Self {
        match err {
            BoardError::TaskNotFound { .. } => ApiError::NotFound("Task not found".into()),
            BoardError::UnknownColumn { column } => {
                ApiError::BadRequest(format!("Unknown column '{}'", column))
            }
            other => {
                error!(error = %other, "Failed to {}", action);
                ApiError::Internal(format!("Failed to {}", action))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router(auth: AuthSettings) -> Router<SharedState> {
    Router::new()
        .route("/api/auth", get(auth_status).post(login))
        .route(
            "/api/tasks",
            get(list_tasks).post(create_task).patch(update_task),
        )
        .route("/api/board", get(get_board))
        .route("/api/drag/start", post(drag_start))
        .route("/api/drag/over", post(drag_over))
        .route("/api/drag/end", post(drag_end))
        .route("/api/drag/cancel", post(drag_cancel))
        .route("/health", get(health_check))
        .layer(middleware::from_fn_with_state(auth, require_auth))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn login(State(state): State<SharedState>, Json(req): Json<LoginRequest>) -> Response {
    if !state.auth.check_password(&req.password) {
        warn!("Login attempt with invalid password");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"success": false, "message": "Invalid password"})),
        )
            .into_response();
    }

    let token = state.auth.issue();
    info!("Login succeeded");
    (
        [(header::SET_COOKIE, state.auth.cookie(&token))],
        Json(serde_json::json!({
            "success": true,
            "token": token,
            "message": "Authentication successful",
        })),
    )
        .into_response()
}

async fn auth_status(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let authenticated = token_from_headers(&headers)
        .map(|token| state.auth.validate(&token))
        .unwrap_or(false);
    let status = if authenticated {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    (
        status,
        Json(serde_json::json!({"success": authenticated, "authenticated": authenticated})),
    )
        .into_response()
}

async fn list_tasks(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    state
        .board
        .refresh()
        .await
        .map_err(|e| ApiError::from_board(e, "fetch tasks"))?;
    Ok(Json(state.board.snapshot().await))
}

async fn create_task(
    State(state): State<SharedState>,
    Json(req): Json<NewTask>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Title is required".into()));
    }
    let task = state
        .board
        .create_task(req)
        .await
        .map_err(|e| ApiError::from_board(e, "create task"))?;
    Ok(Json(serde_json::json!({"task": task, "success": true})))
}

async fn update_task(
    State(state): State<SharedState>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .board
        .update_task_column(&req.task_id, &req.column, req.status)
        .await
        .map_err(|e| ApiError::from_board(e, "update task"))?;
    Ok(Json(serde_json::json!({"success": true, "task": task})))
}

async fn get_board(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.board.board_view().await)
}

async fn drag_start(
    State(state): State<SharedState>,
    Json(req): Json<DragStartRequest>,
) -> impl IntoResponse {
    Json(
        state
            .board
            .apply(DragEvent::Start {
                task_id: req.task_id,
            })
            .await,
    )
}

async fn drag_over(
    State(state): State<SharedState>,
    Json(req): Json<DragOverRequest>,
) -> impl IntoResponse {
    Json(
        state
            .board
            .apply(DragEvent::Over {
                active_id: req.active_id,
                over_id: req.over_id,
            })
            .await,
    )
}

async fn drag_end(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.board.apply(DragEvent::End).await)
}

async fn drag_cancel(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.board.apply(DragEvent::Cancel).await)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::super::columns::ColumnRegistry;
    use super::super::models::{Column, TaskData};
    use super::super::persistence::{MemoryRepository, TaskRepository};
    use super::super::store::test_support::task;
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const PASSWORD: &str = "simpson2024";

    struct TestApp {
        router: Router,
        repo: Arc<MemoryRepository>,
        token: String,
    }

    async fn test_app() -> TestApp {
        let repo = Arc::new(MemoryRepository::new(TaskData {
            tasks: vec![task("1", "backlog"), task("2", "backlog"), task("3", "todo")],
            last_updated: "2024-01-01T00:00:00Z".into(),
        }));
        let columns = ColumnRegistry::new(vec![
            Column::new("backlog", "Backlog"),
            Column::new("todo", "In Progress"),
            Column::new("done", "Done"),
        ])
        .unwrap();
        let board = BoardHandle::load(repo.clone(), columns).await.unwrap();
        let auth = AuthSettings::new(PASSWORD, 24);
        let token = auth.issue();
        let state = Arc::new(AppState::new(board, auth.clone()));
        TestApp {
            router: api_router(auth).with_state(state),
            repo,
            token,
        }
    }

    impl TestApp {
        async fn send(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response {
            let builder = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
            let request = match body {
                Some(json) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            self.router.clone().oneshot(request).await.unwrap()
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check_is_public() {
        let app = test_app().await;
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_login_sets_cookie() {
        let app = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/auth")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"password":"simpson2024"}"#))
            .unwrap();
        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("auth_token="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Max-Age=86400"));

        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Authentication successful");
        assert!(body["token"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let app = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/auth")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"password":"doh"}"#))
            .unwrap();
        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Invalid password");
    }

    #[tokio::test]
    async fn test_auth_status() {
        let app = test_app().await;
        let response = app.send("GET", "/api/auth", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["authenticated"], true);

        let anonymous = Request::builder()
            .uri("/api/auth")
            .body(Body::empty())
            .unwrap();
        let response = app.router.oneshot(anonymous).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["authenticated"], false);
    }

    #[tokio::test]
    async fn test_tasks_require_token() {
        let app = test_app().await;
        let request = Request::builder()
            .uri("/api/tasks")
            .body(Body::empty())
            .unwrap();
        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["message"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_list_tasks() {
        let app = test_app().await;
        let response = app.send("GET", "/api/tasks", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let data: TaskData = body_json(response.into_body()).await;
        assert_eq!(data.tasks.len(), 3);
        assert_eq!(data.last_updated, "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_list_tasks_picks_up_remote_edits() {
        let app = test_app().await;
        app.repo
            .replace_externally(TaskData {
                tasks: vec![task("9", "done")],
                last_updated: "2024-03-01T00:00:00Z".into(),
            })
            .unwrap();
        let response = app.send("GET", "/api/tasks", None).await;
        let data: TaskData = body_json(response.into_body()).await;
        assert_eq!(data.tasks.len(), 1);
        assert_eq!(data.tasks[0].id, "9");
    }

    #[tokio::test]
    async fn test_create_task() {
        let app = test_app().await;
        let response = app
            .send(
                "POST",
                "/api/tasks",
                Some(serde_json::json!({
                    "title": "Eat donut",
                    "assignee": "Homer",
                    "priority": "High",
                    "column": "todo"
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["success"], true);
        assert!(body["task"]["id"].as_str().unwrap().starts_with("task-"));
        assert_eq!(body["task"]["status"], "In Progress");
        assert!(body["task"]["createdDate"].as_str().is_some());

        let stored = app.repo.read().await.unwrap();
        assert_eq!(stored.data.tasks.len(), 4);
    }

    #[tokio::test]
    async fn test_create_task_requires_title() {
        let app = test_app().await;
        let response = app
            .send("POST", "/api/tasks", Some(serde_json::json!({"title": "  "})))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_task() {
        let app = test_app().await;
        let response = app
            .send(
                "PATCH",
                "/api/tasks",
                Some(serde_json::json!({"taskId": "1", "column": "done", "status": "Done"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["success"], true);

        let stored = app.repo.read().await.unwrap().data;
        let moved = stored.tasks.iter().find(|t| t.id == "1").unwrap();
        assert_eq!(moved.column, "done");
        assert_eq!(moved.status, "Done");
    }

    #[tokio::test]
    async fn test_update_task_not_found() {
        let app = test_app().await;
        let response = app
            .send(
                "PATCH",
                "/api/tasks",
                Some(serde_json::json!({"taskId": "99", "column": "done"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["error"], "Task not found");
    }

    #[tokio::test]
    async fn test_update_task_unknown_column() {
        let app = test_app().await;
        let response = app
            .send(
                "PATCH",
                "/api/tasks",
                Some(serde_json::json!({"taskId": "1", "column": "limbo"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_task_conflict_is_500() {
        let app = test_app().await;
        app.repo.replace_externally(TaskData::default()).unwrap();
        let response = app
            .send(
                "PATCH",
                "/api/tasks",
                Some(serde_json::json!({"taskId": "1", "column": "done"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["error"], "Failed to update task");
    }

    #[tokio::test]
    async fn test_get_board_groups_by_column() {
        let app = test_app().await;
        let response = app.send("GET", "/api/board", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        let columns = body["columns"].as_array().unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0]["id"], "backlog");
        assert_eq!(columns[0]["tasks"].as_array().unwrap().len(), 2);
        assert!(body["active_task_id"].is_null());
    }

    #[tokio::test]
    async fn test_drag_flow_over_http() {
        let app = test_app().await;

        let response = app
            .send("POST", "/api/drag/start", Some(serde_json::json!({"taskId": "1"})))
            .await;
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["outcome"], "started");
        assert_eq!(body["active_task_id"], "1");

        let response = app
            .send(
                "POST",
                "/api/drag/over",
                Some(serde_json::json!({"activeId": "1", "overId": "3"})),
            )
            .await;
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["outcome"], "moved");
        assert_eq!(body["column"], "todo");

        let response = app.send("POST", "/api/drag/end", None).await;
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["outcome"], "ended");
        assert_eq!(body["commit"]["column"], "todo");

        let board = app.send("GET", "/api/board", None).await;
        let board: serde_json::Value = body_json(board.into_body()).await;
        assert_eq!(board["columns"][1]["tasks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_drag_unknown_task_is_ignored() {
        let app = test_app().await;
        let response = app
            .send("POST", "/api/drag/start", Some(serde_json::json!({"taskId": "99"})))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["outcome"], "ignored");
        assert!(body["reason"].as_str().unwrap().contains("99"));
    }

    #[tokio::test]
    async fn test_drag_cancel_reverts() {
        let app = test_app().await;
        app.send("POST", "/api/drag/start", Some(serde_json::json!({"taskId": "1"})))
            .await;
        app.send(
            "POST",
            "/api/drag/over",
            Some(serde_json::json!({"activeId": "1", "overId": "done"})),
        )
        .await;
        let response = app.send("POST", "/api/drag/cancel", None).await;
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["outcome"], "cancelled");
        assert_eq!(body["reverted"], true);
        assert_eq!(body["tasks"][0]["column"], "backlog");
    }
}
