use std::net::SocketAddr;
use std::sync::Arc;

use gate_core::{GateConfig, LockStore};
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

/// Bind and serve the broker until the process is signalled to stop.
pub async fn serve(store: Arc<LockStore>, config: GateConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = AppState::new(store, config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gate broker listening");
    axum::serve(listener, app).await?;
    Ok(())
}
