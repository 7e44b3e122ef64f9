use std::time::Duration;

mod ai;
mod app;
mod auth;
mod config;
mod error;
mod frontend;
mod scoring;
mod state;
mod transactions;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "fraudlens=debug,axum=info,tower_http=info,sqlx=warn".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let (host, port) = (config.host.clone(), config.port);
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);

    let app_state = AppState::init(config).await?;
    sqlx::migrate!("./migrations").run(&app_state.db).await?;
    tracing::info!(
        model = %app_state.narrator.model(),
        scoring_url = %app_state.config.scoring.url,
        "startup complete"
    );

    let db = app_state.db.clone();
    let result = app::serve(app::build_app(app_state), &host, port, shutdown_timeout).await;

    db.close().await;
    tracing::info!("database pool closed");
    result
}
