//! Board server command (`taskboard serve`).

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::warn;

use taskboard::board::server::start_server;
use taskboard::board::session::BoardHandle;
use taskboard::config::BoardConfig;

pub async fn cmd_serve(
    config_path: &Path,
    port: Option<u16>,
    host: Option<String>,
    open: bool,
    dev: bool,
) -> Result<()> {
    let config = BoardConfig::resolve(config_path)?;
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let auth = config.auth_settings();
    if auth.password.is_empty() {
        bail!("Refusing to start without a password; set BOARD_PASSWORD");
    }

    let mut server = config.server_config();
    if let Some(port) = port {
        server.port = port;
    }
    if let Some(host) = host {
        server.host = host;
    }
    server.dev_mode |= dev;

    let repo = config.build_repository()?;
    let board = BoardHandle::load(repo, config.column_registry()?)
        .await
        .context("Failed to load task list")?;

    // Spawn browser open before starting the server (which blocks)
    if open {
        let url = format!("http://localhost:{}", server.port);
        tokio::spawn(async move {
            // Small delay to let the server start binding
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                warn!(error = %e, "Failed to open browser");
            }
        });
    }

    start_server(server, board, auth).await
}
