//! Binds the `axum` router and serves it until the process is asked to
//! shut down.

use std::net::SocketAddr;
use std::sync::Arc;

use kala_core::JobCache;
use tracing::info;

use crate::routes::{router, AppState};

pub async fn serve(cache: Arc<JobCache>, bind: &str, token: String) -> std::io::Result<()> {
    let addr: SocketAddr = bind.parse().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let app = router(AppState { cache }, token);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, app).await
}
