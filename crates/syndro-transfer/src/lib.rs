//! HTTP server+client, state machine, approval queue, and sequential and
//! parallel transfer modes (spec §4.6) — the largest component.

pub mod approval;
pub mod client;
pub mod error;
pub mod history;
pub mod parallel;
pub mod server;
pub mod state;

pub use error::TransferError;
pub use state::{EngineConfig, EngineState, TransferEvent};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Binds the first free port in `start_port..start_port+6` (spec §4.6.1),
/// returning the listener and the port it actually bound — read from
/// `local_addr()` rather than the requested value, since a requested port
/// of `0` resolves to an OS-assigned ephemeral port.
pub async fn bind(host: &str, start_port: u16) -> anyhow::Result<(TcpListener, u16)> {
    let mut last_err = None;
    for port in start_port..start_port + 6 {
        let addr: SocketAddr = format!("{host}:{port}").parse()?;
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let bound_port = listener.local_addr()?.port();
                return Ok((listener, bound_port));
            }
            Err(e) => {
                info!("port {port} unavailable ({e}), trying next");
                last_err = Some(e);
            }
        }
    }
    Err(anyhow::anyhow!(
        "no free port in {start_port}..{} ({})",
        start_port + 6,
        last_err.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Binds the HTTP server to the first free port in `start_port..start_port+6`
/// and serves until a shutdown signal arrives, stamping the bound port onto
/// `state` so `/syndro.json` advertises it correctly.
pub async fn serve(state: Arc<state::EngineState>, host: &str, start_port: u16) -> anyhow::Result<()> {
    let (listener, port) = bind(host, start_port).await?;
    state.set_http_port(port);
    info!("syndro transfer engine listening on {host}:{port}");
    let app = server::router(state.clone());
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C, shutting down transfer engine..."),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down transfer engine..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received Ctrl+C, shutting down transfer engine...");
    }
}
