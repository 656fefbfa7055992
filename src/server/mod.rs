pub mod bootstrap;
pub mod runtime;

use crate::proxy::{self, ProxyState};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};

/// Run the proxy's client-facing accept loop with graceful shutdown support.
///
/// When `shutdown` is notified the loop stops accepting new connections and
/// waits up to `DRAIN_TIMEOUT` for in-flight connections to finish before
/// returning.
pub async fn run_proxy_server(listen: &str, state: ProxyState, shutdown: Arc<Notify>) -> Result<()> {
    const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: proxy listening, addr={addr}");

    let active_conns = Arc::new(AtomicI64::new(0));

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => v,
            Err(e) => {
                error!("server: proxy: accept failed, error={e}");
                continue;
            }
        };

        active_conns.fetch_add(1, Ordering::Relaxed);
        let state = state.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            proxy::handle_connection(stream, peer_addr, state).await;
            active_conns.fetch_sub(1, Ordering::Relaxed);
        });
    }

    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!("server: proxy: waiting for {active} active connections to drain");
        let drain = async {
            loop {
                if active_conns.load(Ordering::Relaxed) == 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: proxy: all connections drained"),
            Err(_) => {
                let remaining = active_conns.load(Ordering::Relaxed);
                info!(
                    "server: proxy: drain timeout ({}s), {remaining} connections still active",
                    DRAIN_TIMEOUT.as_secs(),
                );
            }
        }
    }

    Ok(())
}
