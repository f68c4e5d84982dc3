//! Server state, router construction and the serve loop.

mod router;
mod types;

pub use router::create_router;
pub use types::ServerState;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: ServerState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    info!("api listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
