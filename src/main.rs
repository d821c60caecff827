use anyhow::Context;
use tracing_subscriber::EnvFilter;

use portald::config::Config;
use portald::db;
use portald::http::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portald=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let conn = db::open_db(&config.data_dir)
        .with_context(|| format!("opening database under {}", config.data_dir.display()))?;
    let state = AppState::new(conn);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
