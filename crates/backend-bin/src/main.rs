use rideshare_backend_lib::{config::Settings, ws_router, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize configuration; environment overrides beat the file
    let settings = Settings::load().or_else(|_| Settings::load_from("config/default.toml"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Application state with inert routing and fare collaborators; real
    // backends get wired in here when deployed alongside them.
    let state = Arc::new(AppState::with_defaults(settings.clone()));

    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "listening");

    axum::serve(listener, app).await?;

    Ok(())
}
