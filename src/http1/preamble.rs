use crate::error::ProxyError;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Hard limits on preamble shape. Exceeding any of these is a
/// `MalformedRequest`, mapped to a 400 by the caller.
pub const MAX_PREAMBLE_BYTES: usize = 65536;
pub const MAX_HEADER_LINE_BYTES: usize = 8192;
pub const MAX_HEADER_COUNT: usize = 100;

/// Default chunk size for body/response relaying.
pub const CHUNK_SIZE: usize = 65536;

/// Ordered header list with a case-insensitive name index, matching the
/// "dynamic header map" design note: emission must preserve original order,
/// so this is a plain `Vec` of pairs rather than a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct HeaderList {
    pairs: Vec<(String, String)>,
    index: HashMap<String, Vec<usize>>,
}

impl HeaderList {
    pub fn push(&mut self, name: String, value: String) {
        let key = name.to_ascii_lowercase();
        self.index.entry(key).or_default().push(self.pairs.len());
        self.pairs.push((name, value));
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = name.to_ascii_lowercase();
        self.index
            .get(&key)
            .and_then(|positions| positions.first())
            .map(|&i| self.pairs[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Derived body descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    Length(u64),
    UntilClose,
}

#[derive(Debug, Clone)]
pub struct Preamble {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: HeaderList,
    pub body: BodyKind,
}

fn bodyless_method(method: &str) -> bool {
    matches!(method, "GET" | "HEAD" | "OPTIONS" | "DELETE")
}

/// Read a request preamble from `reader`, byte by byte until CRLFCRLF is
/// found or `MAX_PREAMBLE_BYTES` is exceeded. Returns the parsed preamble
/// and any body bytes that were read ahead as part of the same TCP segment
/// (there usually are none with a byte-at-a-time reader, but callers should
/// not assume that).
pub async fn read_preamble<R>(reader: &mut R) -> Result<Preamble, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        if buf.len() >= MAX_PREAMBLE_BYTES {
            return Err(ProxyError::MalformedRequest(
                "preamble exceeds max_preamble_bytes".to_string(),
            ));
        }
        let n = reader
            .read(&mut byte)
            .await
            .map_err(|e| ProxyError::MalformedRequest(format!("read error: {e}")))?;
        if n == 0 {
            return Err(ProxyError::MalformedRequest(
                "connection closed before CRLFCRLF".to_string(),
            ));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    parse_preamble(&buf)
}

fn parse_preamble(buf: &[u8]) -> Result<Preamble, ProxyError> {
    let text = std::str::from_utf8(buf)
        .map_err(|_| ProxyError::MalformedRequest("preamble is not valid UTF-8".to_string()))?;

    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing request line".to_string()))?;

    let mut tokens = request_line.splitn(3, ' ');
    let method = tokens
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProxyError::MalformedRequest("missing method".to_string()))?
        .to_string();
    let path = tokens
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProxyError::MalformedRequest("missing path".to_string()))?
        .to_string();
    let version = tokens
        .next()
        .ok_or_else(|| ProxyError::MalformedRequest("missing version".to_string()))?
        .to_string();
    if version != "HTTP/1.0" && version != "HTTP/1.1" {
        return Err(ProxyError::MalformedRequest(format!(
            "unsupported version '{version}'"
        )));
    }

    let mut headers = HeaderList::default();
    for line in lines {
        if line.is_empty() {
            // the trailing blank line before CRLFCRLF's final pair
            continue;
        }
        if line.len() > MAX_HEADER_LINE_BYTES {
            return Err(ProxyError::MalformedRequest(
                "header line exceeds max_header_line_bytes".to_string(),
            ));
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            ProxyError::MalformedRequest(format!("header line missing colon: '{line}'"))
        })?;
        if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_whitespace()) || name.is_empty() {
            return Err(ProxyError::MalformedRequest(format!(
                "invalid header name '{name}'"
            )));
        }
        headers.push(name.to_string(), value.trim().to_string());
        if headers.len() > MAX_HEADER_COUNT {
            return Err(ProxyError::MalformedRequest(
                "header count exceeds max_header_count".to_string(),
            ));
        }
    }

    let body = classify_body(&method, &headers)?;

    Ok(Preamble {
        method,
        path,
        version,
        headers,
        body,
    })
}

fn classify_body(method: &str, headers: &HeaderList) -> Result<BodyKind, ProxyError> {
    let has_transfer_encoding = headers.contains("Transfer-Encoding");
    let content_length = headers.get("Content-Length");

    if has_transfer_encoding {
        return Ok(BodyKind::UntilClose);
    }
    if let Some(raw) = content_length {
        let n: u64 = raw
            .trim()
            .parse()
            .map_err(|_| ProxyError::MalformedRequest(format!("invalid Content-Length '{raw}'")))?;
        return Ok(BodyKind::Length(n));
    }
    if bodyless_method(method) {
        return Ok(BodyKind::None);
    }
    Ok(BodyKind::None)
}

/// Render the preamble to send upstream: request line unchanged, headers in
/// original order, `Connection: close` forced (replacing any existing
/// value), and `X-Trace-ID` injected, terminated by CRLFCRLF.
pub fn render_upstream_preamble(preamble: &Preamble, trace_id: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(
        format!("{} {} {}\r\n", preamble.method, preamble.path, preamble.version).as_bytes(),
    );
    for (name, value) in preamble.headers.iter() {
        if name.eq_ignore_ascii_case("Connection") {
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"Connection: close\r\n");
    out.extend_from_slice(format!("X-Trace-ID: {trace_id}\r\n").as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}
