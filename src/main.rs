mod app;
mod auth;
mod comments;
mod config;
mod db;
mod error;
mod extract;
mod posts;
mod public_id;
mod state;
mod storage;
mod users;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "socialhub=debug,axum=info,tower_http=info".to_string());
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
    let state = AppState::init(config).await?;

    if let Some(admin) = &state.config.admin {
        if let Err(e) = auth::services::ensure_superuser(state.store.as_ref(), admin).await {
            tracing::warn!(error = %e, "superuser provisioning failed; continuing");
        }
    }

    app::serve(app::build_app(state)).await
}
