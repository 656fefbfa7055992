use super::preamble::{BodyKind, CHUNK_SIZE};
use crate::error::ProxyError;
use crate::timeout::TimeoutPolicy;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copy a request body from `reader` to `writer` per the body descriptor.
/// Each write is awaited to completion before the next chunk is read — the
/// drain barrier that couples producer throughput to the upstream's
/// consumption rate — and bounded by the write deadline.
pub async fn relay_request_body<R, W>(
    body: BodyKind,
    reader: &mut R,
    writer: &mut W,
    policy: &TimeoutPolicy,
) -> Result<(), ProxyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match body {
        BodyKind::None => Ok(()),
        BodyKind::Length(mut remaining) => {
            let mut buf = vec![0u8; CHUNK_SIZE];
            while remaining > 0 {
                let want = remaining.min(CHUNK_SIZE as u64) as usize;
                let n = reader
                    .read(&mut buf[..want])
                    .await
                    .map_err(|_| ProxyError::PeerClosed)?;
                if n == 0 {
                    return Err(ProxyError::PeerClosed);
                }
                policy
                    .with_write(writer.write_all(&buf[..n]))
                    .await?
                    .map_err(|_| ProxyError::PeerClosed)?;
                remaining -= n as u64;
            }
            Ok(())
        }
        BodyKind::UntilClose => {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf).await.map_err(|_| ProxyError::PeerClosed)?;
                if n == 0 {
                    break;
                }
                policy
                    .with_write(writer.write_all(&buf[..n]))
                    .await?
                    .map_err(|_| ProxyError::PeerClosed)?;
            }
            Ok(())
        }
    }
}

/// Outcome of relaying the upstream's response to the client. Always
/// reports `bytes_sent` so far, even on failure — the caller needs that to
/// decide between a synthetic error response and a silent mid-stream
/// termination.
pub struct RelayedResponse {
    pub bytes_sent: u64,
    /// First byte of the status code, best-effort, from the first chunk
    /// relayed. `None` if the upstream closed before sending any bytes.
    pub status_class: Option<char>,
    pub error: Option<ProxyError>,
}

/// Pump bytes from `upstream_reader` to `client_writer` in chunks, each
/// bounded by the read deadline, until EOF. Does not parse the response;
/// bytes are forwarded verbatim. The status class is
/// extracted from the first chunk only, without added buffering.
pub async fn relay_response<R, W>(
    upstream_reader: &mut R,
    client_writer: &mut W,
    policy: &TimeoutPolicy,
) -> RelayedResponse
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes_sent = 0u64;
    let mut status_class = None;
    let mut first_chunk = true;

    loop {
        let n = match policy.with_read(upstream_reader.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(_)) => {
                return RelayedResponse {
                    bytes_sent,
                    status_class,
                    error: Some(ProxyError::PeerClosed),
                }
            }
            Err(timeout_err) => {
                return RelayedResponse {
                    bytes_sent,
                    status_class,
                    error: Some(timeout_err),
                }
            }
        };
        if n == 0 {
            break;
        }
        if first_chunk {
            status_class = classify_status_line(&buf[..n]);
            first_chunk = false;
        }
        if client_writer.write_all(&buf[..n]).await.is_err() {
            return RelayedResponse {
                bytes_sent,
                status_class,
                error: Some(ProxyError::PeerClosed),
            };
        }
        bytes_sent += n as u64;
    }

    RelayedResponse {
        bytes_sent,
        status_class,
        error: None,
    }
}

/// Extract the leading digit of an HTTP status code from a response's first
/// chunk, e.g. `b"HTTP/1.1 200 OK\r\n..."` -> `Some('2')`. Best-effort: a
/// chunk boundary that splits the status line yields `None`.
fn classify_status_line(chunk: &[u8]) -> Option<char> {
    let text = std::str::from_utf8(chunk).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    parts.next()?; // "HTTP/1.x"
    let code = parts.next()?;
    code.chars().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutsConfig;
    use std::io::Cursor;

    fn unbounded_policy() -> TimeoutPolicy {
        TimeoutPolicy::from_config(&TimeoutsConfig {
            connect_ms: 0,
            read_ms: 0,
            write_ms: 0,
            total_ms: 0,
        })
    }

    #[tokio::test]
    async fn test_relay_request_body_length() {
        let mut reader = Cursor::new(b"hello world".to_vec());
        let mut writer = Vec::new();
        relay_request_body(BodyKind::Length(11), &mut reader, &mut writer, &unbounded_policy())
            .await
            .unwrap();
        assert_eq!(writer, b"hello world");
    }

    #[tokio::test]
    async fn test_relay_request_body_none_is_noop() {
        let mut reader = Cursor::new(Vec::new());
        let mut writer = Vec::new();
        relay_request_body(BodyKind::None, &mut reader, &mut writer, &unbounded_policy())
            .await
            .unwrap();
        assert!(writer.is_empty());
    }

    #[tokio::test]
    async fn test_relay_request_body_until_close() {
        let mut reader = Cursor::new(b"chunked-opaque-bytes".to_vec());
        let mut writer = Vec::new();
        relay_request_body(BodyKind::UntilClose, &mut reader, &mut writer, &unbounded_policy())
            .await
            .unwrap();
        assert_eq!(writer, b"chunked-opaque-bytes");
    }

    #[tokio::test]
    async fn test_relay_response_classifies_2xx() {
        let mut reader = Cursor::new(b"HTTP/1.1 200 OK\r\n\r\nok".to_vec());
        let mut writer = Vec::new();
        let result = relay_response(&mut reader, &mut writer, &unbounded_policy()).await;
        assert!(result.error.is_none());
        assert_eq!(result.status_class, Some('2'));
        assert_eq!(writer, b"HTTP/1.1 200 OK\r\n\r\nok");
        assert_eq!(result.bytes_sent, writer.len() as u64);
    }

    #[tokio::test]
    async fn test_relay_response_empty_upstream_has_no_status_class() {
        let mut reader = Cursor::new(Vec::new());
        let mut writer = Vec::new();
        let result = relay_response(&mut reader, &mut writer, &unbounded_policy()).await;
        assert!(result.error.is_none());
        assert!(result.status_class.is_none());
        assert_eq!(result.bytes_sent, 0);
    }

    #[tokio::test]
    async fn test_relay_response_read_timeout_reports_partial_bytes() {
        struct StallAfterFirstChunk {
            served_first: bool,
        }
        impl AsyncRead for StallAfterFirstChunk {
            fn poll_read(
                mut self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                if !self.served_first {
                    self.served_first = true;
                    buf.put_slice(b"HTTP/1.1 200 OK\r\n\r\nhi");
                    return std::task::Poll::Ready(Ok(()));
                }
                // Never wakes again — the surrounding timeout's own timer
                // is what ends this test, not a readiness notification.
                std::task::Poll::Pending
            }
        }

        let policy = TimeoutPolicy::from_config(&TimeoutsConfig {
            connect_ms: 0,
            read_ms: 10,
            write_ms: 0,
            total_ms: 0,
        });
        let mut reader = StallAfterFirstChunk { served_first: false };
        let mut writer = Vec::new();
        let result = relay_response(&mut reader, &mut writer, &policy).await;
        assert!(matches!(result.error, Some(ProxyError::ReadTimeout)));
        assert_eq!(result.bytes_sent, "HTTP/1.1 200 OK\r\n\r\nhi".len() as u64);
        assert_eq!(result.status_class, Some('2'));
    }
}
