use std::net::SocketAddr;

use anyhow::Context;
use escape_room_engine::VenueLayout;
use room_controller::{router, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Service entrypoint: seeds the room, starts its listeners and serves staff routes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let layout = match std::env::var("VENUE_FILE") {
        Ok(path) => VenueLayout::load(&path).with_context(|| format!("loading venue layout {path}"))?,
        Err(_) => VenueLayout::bundled().context("loading the bundled venue layout")?,
    };
    let state = AppState::boot(layout).await?;
    let _listeners = state.scope.guard();
    let app = router(state);

    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "room controller listening");
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
