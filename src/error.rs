use std::fmt;

/// Error kinds produced by the request-lifecycle engine.
///
/// `PermitDenied` is intentionally unused by any constructor: connection
/// limits apply backpressure by waiting, they never reject.
#[derive(Debug)]
#[allow(dead_code)]
pub enum ProxyError {
    MalformedRequest(String),
    ConnectError(std::io::Error),
    ConnectTimeout,
    ReadTimeout,
    WriteTimeout,
    TotalTimeout,
    PermitDenied,
    PeerClosed,
    ConfigError(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::MalformedRequest(msg) => write!(f, "malformed request: {msg}"),
            ProxyError::ConnectError(e) => write!(f, "connect error: {e}"),
            ProxyError::ConnectTimeout => write!(f, "connect timeout"),
            ProxyError::ReadTimeout => write!(f, "read timeout"),
            ProxyError::WriteTimeout => write!(f, "write timeout"),
            ProxyError::TotalTimeout => write!(f, "total timeout"),
            ProxyError::PermitDenied => write!(f, "permit denied"),
            ProxyError::PeerClosed => write!(f, "peer closed"),
            ProxyError::ConfigError(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ProxyError {}
