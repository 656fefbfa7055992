use crate::config::TimeoutsConfig;
use crate::error::ProxyError;
use std::future::Future;
use std::time::Duration;

/// Four independent deadline wrappers. A zero millisecond value in
/// config means "no bound for this phase" and is stored as `None` here so
/// the hot path never has to special-case zero durations.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    connect: Option<Duration>,
    read: Option<Duration>,
    write: Option<Duration>,
    total: Option<Duration>,
}

fn millis(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

impl TimeoutPolicy {
    pub fn from_config(cfg: &TimeoutsConfig) -> Self {
        Self {
            connect: millis(cfg.connect_ms),
            read: millis(cfg.read_ms),
            write: millis(cfg.write_ms),
            total: millis(cfg.total_ms),
        }
    }

    /// Bound `fut` by the connect deadline. The operation must be passed
    /// unstarted (a fresh `Future`, e.g. `TcpStream::connect(addr)`) so this
    /// wrapper owns its scheduling and can cancel it on deadline.
    pub async fn with_connect<F, T>(&self, fut: F) -> Result<T, ProxyError>
    where
        F: Future<Output = T>,
    {
        self.bound(self.connect, fut, ProxyError::ConnectTimeout).await
    }

    pub async fn with_read<F, T>(&self, fut: F) -> Result<T, ProxyError>
    where
        F: Future<Output = T>,
    {
        self.bound(self.read, fut, ProxyError::ReadTimeout).await
    }

    pub async fn with_write<F, T>(&self, fut: F) -> Result<T, ProxyError>
    where
        F: Future<Output = T>,
    {
        self.bound(self.write, fut, ProxyError::WriteTimeout).await
    }

    pub async fn with_total<F, T>(&self, fut: F) -> Result<T, ProxyError>
    where
        F: Future<Output = T>,
    {
        self.bound(self.total, fut, ProxyError::TotalTimeout).await
    }

    async fn bound<F, T>(&self, deadline: Option<Duration>, fut: F, on_expiry: ProxyError) -> Result<T, ProxyError>
    where
        F: Future<Output = T>,
    {
        match deadline {
            Some(d) => tokio::time::timeout(d, fut).await.map_err(|_| on_expiry),
            None => Ok(fut.await),
        }
    }
}
