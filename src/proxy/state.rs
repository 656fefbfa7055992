use crate::config::ProxyConfig;
use crate::limits::ConnectionLimiter;
use crate::metrics::Metrics;
use crate::pool::{Upstream, UpstreamPool};
use crate::timeout::TimeoutPolicy;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Everything a single request needs, bundled so a reload swaps it all at
/// once. A handler that already captured an `Arc<ProxyInner>` keeps running
/// against it even after a newer one replaces it in `ProxyState` — new
/// connections see the new upstream list, timeouts and limits; in-flight
/// connections finish with what they started with.
pub struct ProxyInner {
    pub config: ProxyConfig,
    pub pool: UpstreamPool,
    pub limiter: ConnectionLimiter,
    pub timeouts: TimeoutPolicy,
}

impl ProxyInner {
    fn build(config: ProxyConfig) -> Self {
        let upstreams: Vec<Upstream> = config.upstreams.iter().map(Upstream::from).collect();
        let limiter = ConnectionLimiter::new(
            config.limits.max_client_conns,
            config.limits.max_conns_per_upstream,
        );
        let timeouts = TimeoutPolicy::from_config(&config.timeouts);
        Self {
            pool: UpstreamPool::new(upstreams),
            limiter,
            timeouts,
            config,
        }
    }
}

/// Root shared state for the proxy: a hot-swappable config/pool/limiter
/// bundle plus the (non-reloadable) metrics sink.
#[derive(Clone)]
pub struct ProxyState {
    inner: Arc<ArcSwap<ProxyInner>>,
    pub metrics: Metrics,
}

impl ProxyState {
    pub fn new(config: ProxyConfig, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(Arc::new(ProxyInner::build(config)))),
            metrics,
        }
    }

    /// Snapshot the currently active config/pool/limiter bundle. A handler
    /// should call this exactly once at accept time and hold the result for
    /// its whole lifetime.
    pub fn current(&self) -> Arc<ProxyInner> {
        self.inner.load_full()
    }

    /// Atomically replace the active bundle with one built from `config`.
    /// Capacity decreases do not forcibly evict permits already outstanding
    /// against the old limiter — it simply stops being handed out to new
    /// connections and is dropped once its last holder releases.
    pub fn reload(&self, config: ProxyConfig) {
        self.inner.store(Arc::new(ProxyInner::build(config)));
    }
}
