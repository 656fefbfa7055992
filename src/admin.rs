use crate::http1::read_preamble;
use crate::metrics::Metrics;
use anyhow::Result;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use std::sync::Arc;

/// Serve `/metrics` and `/healthz` on a raw socket, using the same preamble
/// reader as the proxy path rather than pulling in a framework for two
/// routes. Anything else gets a 404.
pub async fn run(listen: &str, metrics: Metrics, shutdown: Arc<Notify>) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("admin: listening, addr={addr}");

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                tracing::info!("admin: stop accepting new connections");
                break;
            }
        };

        let (stream, _peer) = match accepted {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("admin: accept failed, error={e}");
                continue;
            }
        };

        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_one(stream, metrics).await {
                tracing::debug!("admin: connection error, error={e}");
            }
        });
    }

    Ok(())
}

async fn serve_one(mut stream: TcpStream, metrics: Metrics) -> Result<()> {
    let preamble = match read_preamble(&mut stream).await {
        Ok(p) => p,
        Err(_) => {
            write_response(&mut stream, 400, "text/plain", "bad request").await?;
            return Ok(());
        }
    };

    match (preamble.method.as_str(), preamble.path.as_str()) {
        ("GET", "/metrics") => {
            write_response(&mut stream, 200, "text/plain; version=0.0.4", &metrics.render()).await?;
        }
        ("GET", "/healthz") => {
            write_response(&mut stream, 200, "text/plain", "ok").await?;
        }
        _ => {
            write_response(&mut stream, 404, "text/plain", "not found").await?;
        }
    }
    Ok(())
}

async fn write_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) -> Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
