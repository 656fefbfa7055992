use crate::error::ProxyError;
use crate::http1::{self, BodyKind};
use crate::proxy::state::ProxyState;
use crate::timeout::TimeoutPolicy;
use rand::RngCore;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Orchestrates one accepted client connection end to end: parse, select,
/// gate, connect, stream request, stream response, release. Never lets an
/// error escape — every failure is mapped to a client response (or a silent
/// close) and a metric, so one misbehaving connection can never destabilize
/// the accept loop.
pub async fn handle_connection(mut client: TcpStream, peer_addr: SocketAddr, state: ProxyState) {
    let trace_id = generate_trace_id();
    let span = tracing::info_span!("connection", trace_id = %trace_id, peer = %peer_addr);
    let _guard = span.enter();

    let inner = state.current();
    let start = Instant::now();

    // Connections beyond max_client_conns queue here, they never fail.
    let _client_permit = inner.limiter.acquire_client().await;
    tracing::debug!(stage = "gating", "client permit acquired");

    let preamble = match http1::read_preamble(&mut client).await {
        Ok(p) => p,
        Err(ProxyError::MalformedRequest(reason)) => {
            tracing::debug!(stage = "parsing", %reason, "malformed request");
            state.metrics.record_parse_error();
            write_error_response(&mut client, 400, "Bad Request", None).await;
            return;
        }
        Err(_) => return,
    };
    state.metrics.record_request_parsed();
    tracing::debug!(stage = "parsing", method = %preamble.method, path = %preamble.path, "preamble parsed");

    let upstream = match inner.pool.next() {
        Some(u) => u.clone(),
        None => {
            tracing::error!(stage = "selecting", "upstream pool is empty");
            write_error_response(
                &mut client,
                502,
                "Bad Gateway",
                Some("Upstream unavailable: no upstreams configured"),
            )
            .await;
            return;
        }
    };
    let upstream_addr = upstream.addr();
    state.metrics.record_upstream_request(&upstream_addr);
    tracing::debug!(stage = "selecting", upstream = %upstream_addr, "upstream selected");

    let _upstream_permit = inner.limiter.acquire_upstream(&upstream_addr).await;
    tracing::debug!(stage = "gating", upstream = %upstream_addr, "upstream permit acquired");

    let mut upstream_stream = match inner
        .timeouts
        .with_connect(TcpStream::connect(&upstream_addr))
        .await
    {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            let error_type = if e.kind() == std::io::ErrorKind::ConnectionRefused {
                "connection_refused"
            } else {
                "other"
            };
            state.metrics.record_upstream_error(&upstream_addr, error_type);
            let err = ProxyError::ConnectError(e);
            tracing::warn!(stage = "connecting", upstream = %upstream_addr, error = %err, "upstream connect failed");
            write_error_response(
                &mut client,
                502,
                "Bad Gateway",
                Some(&format!("Upstream unavailable: {err}")),
            )
            .await;
            return;
        }
        Err(ProxyError::ConnectTimeout) => {
            state.metrics.record_timeout("connect");
            state.metrics.record_upstream_error(&upstream_addr, "timeout");
            tracing::warn!(stage = "connecting", upstream = %upstream_addr, "connect timeout");
            write_error_response(&mut client, 504, "Gateway Timeout", None).await;
            return;
        }
        Err(_) => return,
    };
    tracing::debug!(stage = "connecting", upstream = %upstream_addr, "connected");

    let outcome = inner
        .timeouts
        .with_total(run_exchange(
            &mut client,
            &mut upstream_stream,
            &preamble,
            &trace_id,
            &inner.timeouts,
        ))
        .await;

    let (bytes_sent, status_class) = match outcome {
        Ok(Ok(relayed)) => {
            tracing::debug!(stage = "draining", bytes_sent = relayed.bytes_sent, "exchange complete");
            (relayed.bytes_sent, relayed.status_class)
        }
        Ok(Err((err, relayed))) => {
            handle_exchange_failure(&mut client, &state, &upstream_addr, err, relayed.bytes_sent).await;
            (relayed.bytes_sent, relayed.status_class)
        }
        Err(ProxyError::TotalTimeout) => {
            state.metrics.record_timeout("total");
            state.metrics.record_upstream_error(&upstream_addr, "timeout");
            tracing::warn!(stage = "closed", upstream = %upstream_addr, "total deadline exceeded");
            write_error_response(&mut client, 504, "Gateway Timeout", None).await;
            (0, None)
        }
        Err(_) => (0, None),
    };

    let _ = upstream_stream.shutdown().await;
    let _ = client.shutdown().await;

    state.metrics.record_bytes_sent(bytes_sent);
    state.metrics.record_duration(start.elapsed().as_secs_f64());
    if let Some(class) = status_class {
        state.metrics.record_response(class);
    }
}

struct ExchangeResult {
    bytes_sent: u64,
    status_class: Option<&'static str>,
}

fn empty_exchange_result() -> ExchangeResult {
    ExchangeResult {
        bytes_sent: 0,
        status_class: None,
    }
}

/// Send the request preamble and body, then pump the response back. Returns
/// `Err((cause, partial))` on failure so the caller can decide between a
/// synthetic error response and a silent mid-stream close: `cause` is the
/// actual `ProxyError` the failing leg produced, not just which direction it
/// happened in, since a client disconnect and a deadline expiry demand
/// different handling even when both happen on the write side.
async fn run_exchange(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    preamble: &http1::Preamble,
    trace_id: &str,
    policy: &TimeoutPolicy,
) -> Result<ExchangeResult, (ProxyError, ExchangeResult)> {
    let preamble_bytes = http1::render_upstream_preamble(preamble, trace_id);
    match policy.with_write(upstream.write_all(&preamble_bytes)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => return Err((ProxyError::PeerClosed, empty_exchange_result())),
        Err(timeout) => return Err((timeout, empty_exchange_result())),
    }

    if let Err(cause) = http1::relay_request_body(preamble.body, client, upstream, policy).await {
        return Err((cause, empty_exchange_result()));
    }

    let relayed = http1::relay_response(upstream, client, policy).await;
    let status_class = relayed.status_class.map(status_class_label);

    match relayed.error {
        None => Ok(ExchangeResult {
            bytes_sent: relayed.bytes_sent,
            status_class,
        }),
        Some(cause) => Err((
            cause,
            ExchangeResult {
                bytes_sent: relayed.bytes_sent,
                status_class,
            },
        )),
    }
}

async fn handle_exchange_failure(
    client: &mut TcpStream,
    state: &ProxyState,
    upstream_addr: &str,
    cause: ProxyError,
    bytes_already_sent: u64,
) {
    match cause {
        ProxyError::PeerClosed => {
            // Client or upstream hung up mid-exchange. The leg is already
            // dead, so there is nothing useful to write back and no deadline
            // was missed — this isn't counted as an error.
            tracing::debug!(stage = "exchanging", upstream = %upstream_addr, bytes_already_sent, "peer closed mid-exchange");
        }
        ProxyError::WriteTimeout => {
            // Nothing has reached the client yet: a write-side deadline
            // always maps to a synthetic response, never a partial stream.
            state.metrics.record_timeout("write");
            state.metrics.record_upstream_error(upstream_addr, "timeout");
            tracing::warn!(stage = "writing_request", upstream = %upstream_addr, "write deadline exceeded");
            write_error_response(client, 504, "Gateway Timeout", None).await;
        }
        ProxyError::ReadTimeout => {
            state.metrics.record_timeout("read");
            state.metrics.record_upstream_error(upstream_addr, "timeout");
            if bytes_already_sent == 0 {
                tracing::warn!(stage = "reading_response", upstream = %upstream_addr, "read deadline exceeded before any bytes relayed");
                write_error_response(client, 504, "Gateway Timeout", None).await;
            } else {
                tracing::debug!(stage = "reading_response", upstream = %upstream_addr, bytes_already_sent, "terminating mid-stream");
            }
        }
        other => {
            tracing::warn!(stage = "exchanging", upstream = %upstream_addr, error = %other, "unexpected exchange failure");
            if bytes_already_sent == 0 {
                write_error_response(client, 502, "Bad Gateway", None).await;
            }
        }
    }
}

fn status_class_label(first_digit: char) -> &'static str {
    match first_digit {
        '2' => "2xx",
        '3' => "3xx",
        '4' => "4xx",
        '5' => "5xx",
        _ => "other",
    }
}

async fn write_error_response(client: &mut TcpStream, status: u16, reason: &str, body: Option<&str>) {
    let body = body.unwrap_or("");
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nConnection: close\r\nContent-Length: {}\r\nContent-Type: text/plain\r\n\r\n{body}",
        body.len()
    );
    let _ = client.write_all(response.as_bytes()).await;
}

fn generate_trace_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyConfig, TimeoutsConfig, UpstreamConfig};
    use crate::metrics::Metrics;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    fn test_config(upstream_port: u16) -> ProxyConfig {
        let mut cfg = ProxyConfig::default();
        cfg.upstreams = vec![UpstreamConfig {
            host: "127.0.0.1".to_string(),
            port: upstream_port,
        }];
        cfg.timeouts = TimeoutsConfig {
            connect_ms: 200,
            read_ms: 500,
            write_ms: 500,
            total_ms: 2000,
        };
        cfg
    }

    #[tokio::test]
    async fn test_get_happy_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            let req = String::from_utf8_lossy(&buf[..n]);
            assert!(req.contains("Connection: close"));
            assert!(req.contains("X-Trace-ID:"));
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
        });

        let state = ProxyState::new(test_config(port), Metrics::install());

        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(async move {
            let (sock, peer) = server.accept().await.unwrap();
            handle_connection(sock, peer, state).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("ok"));

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_yields_502() {
        // Bind then drop to free a port with no listener on it.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = probe.local_addr().unwrap().port();
        drop(probe);

        let state = ProxyState::new(test_config(dead_port), Metrics::install());
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(async move {
            let (sock, peer) = server.accept().await.unwrap();
            handle_connection(sock, peer, state).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 502"));
        assert!(response.contains("Upstream unavailable:"));

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_yields_400() {
        let state = ProxyState::new(test_config(1), Metrics::install());
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(async move {
            let (sock, peer) = server.accept().await.unwrap();
            handle_connection(sock, peer, state).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"NOT A REQUEST\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 400"));

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_post_with_body_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            let req = String::from_utf8_lossy(&buf[..n]);
            assert!(req.ends_with("hello world"));
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world")
                .await
                .unwrap();
        });

        let state = ProxyState::new(test_config(port), Metrics::install());
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(async move {
            let (sock, peer) = server.accept().await.unwrap();
            handle_connection(sock, peer, state).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"POST /e HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.ends_with("hello world"));

        server_task.await.unwrap();
    }
}
