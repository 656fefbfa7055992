use crate::config::UpstreamConfig;
use std::sync::atomic::{AtomicU64, Ordering};

/// A single upstream endpoint, identified by its `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
}

impl Upstream {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&UpstreamConfig> for Upstream {
    fn from(cfg: &UpstreamConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
        }
    }
}

/// Unweighted round-robin selection over a fixed set of upstreams.
///
/// Upstreams carry no weight field here, so selection is a plain modular
/// counter rather than a prefix-sum search — the counter still needs to be
/// atomic since accepted connections are handled on separate tasks.
pub struct UpstreamPool {
    upstreams: Vec<Upstream>,
    counter: AtomicU64,
}

impl UpstreamPool {
    pub fn new(upstreams: Vec<Upstream>) -> Self {
        Self {
            upstreams,
            counter: AtomicU64::new(0),
        }
    }

    /// Select the next upstream in round-robin order. Returns `None` only
    /// if the pool was built with an empty list, which `ProxyConfig::validate`
    /// already rejects at load time.
    pub fn next(&self) -> Option<&Upstream> {
        if self.upstreams.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) as usize % self.upstreams.len();
        self.upstreams.get(idx)
    }

    pub fn all(&self) -> &[Upstream] {
        &self.upstreams
    }
}
