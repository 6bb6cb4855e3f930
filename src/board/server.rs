use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, middleware, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::api::{self, AppState};
use super::auth::{AuthSettings, require_auth};
use super::session::{BoardHandle, RefreshOutcome};
use super::ws;

/// Configuration for the board server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
    /// Seconds between re-reads of the stored task list; 0 disables it.
    pub refresh_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            dev_mode: false,
            refresh_secs: 30,
        }
    }
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_tx = state.ws_tx.clone();
    let auth = state.auth.clone();

    // Pushes the whole task list; guarded like /api.
    let ws_routes = Router::new()
        .route(
            "/ws",
            get(move |ws_upgrade| ws::ws_handler_with_sender(ws_upgrade, ws_tx)),
        )
        .route_layer(middleware::from_fn_with_state(auth.clone(), require_auth));

    api::api_router(auth)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically pull remote edits into the session.
pub fn spawn_refresh_loop(board: BoardHandle, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            match board.refresh().await {
                Ok(RefreshOutcome::Reloaded) => info!("Board refreshed from store"),
                Ok(outcome) => debug!(?outcome, "Board refresh"),
                Err(e) => warn!(error = %e, "Board refresh failed"),
            }
        }
    })
}

/// Start the board server and block until Ctrl+C.
pub async fn start_server(
    config: ServerConfig,
    board: BoardHandle,
    auth: AuthSettings,
) -> Result<()> {
    let refresh = (config.refresh_secs > 0)
        .then(|| spawn_refresh_loop(board.clone(), Duration::from_secs(config.refresh_secs)));

    let store = board.describe_store();
    let state = Arc::new(AppState::new(board.clone(), auth));
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, store = %store, "Task board listening");
    println!("Task board running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = refresh {
        handle.abort();
    }
    // Let queued commits land before the process exits.
    board.flush().await;
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::super::columns::ColumnRegistry;
    use super::super::models::TaskData;
    use super::super::persistence::MemoryRepository;
    use super::super::store::test_support::task;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_router() -> (Router, AuthSettings) {
        let repo = Arc::new(MemoryRepository::new(TaskData {
            tasks: vec![task("1", "backlog")],
            last_updated: String::new(),
        }));
        let board = BoardHandle::load(repo, ColumnRegistry::default())
            .await
            .unwrap();
        let auth = AuthSettings::new("secret", 24);
        let state = Arc::new(AppState::new(board, auth.clone()));
        (build_router(state), auth)
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.refresh_secs, 30);
        assert!(!config.dev_mode);
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let (app, _) = test_router().await;
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted_behind_auth() {
        let (app, auth) = test_router().await;
        let req = Request::builder()
            .uri("/api/board")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/board")
            .header(header::COOKIE, format!("auth_token={}", auth.issue()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let board: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(board["columns"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let (app, auth) = test_router().await;
        let req = Request::builder()
            .uri("/ws")
            .header(header::COOKIE, format!("auth_token={}", auth.issue()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        // A plain GET without upgrade headers is rejected by the extractor.
        assert!(resp.status().is_client_error());
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ws_route_rejects_anonymous_upgrade() {
        let (app, _) = test_router().await;
        let req = Request::builder()
            .uri("/ws")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (app, _) = test_router().await;
        let req = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
