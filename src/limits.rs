use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Two-level connection limiter: one global semaphore bounding client
/// connections, plus one semaphore per upstream identity created lazily on
/// first use. Acquiring only ever waits — it never rejects, so there is no
/// error path here to surface.
pub struct ConnectionLimiter {
    client: Arc<Semaphore>,
    per_upstream: DashMap<String, Arc<Semaphore>>,
    max_conns_per_upstream: usize,
}

impl ConnectionLimiter {
    pub fn new(max_client_conns: usize, max_conns_per_upstream: usize) -> Self {
        Self {
            client: Arc::new(Semaphore::new(max_client_conns)),
            per_upstream: DashMap::new(),
            max_conns_per_upstream,
        }
    }

    pub async fn acquire_client(&self) -> OwnedSemaphorePermit {
        self.client
            .clone()
            .acquire_owned()
            .await
            .expect("client semaphore is never closed")
    }

    pub async fn acquire_upstream(&self, upstream_key: &str) -> OwnedSemaphorePermit {
        let sem = self.get_or_create(upstream_key);
        sem.acquire_owned()
            .await
            .expect("upstream semaphore is never closed")
    }

    fn get_or_create(&self, upstream_key: &str) -> Arc<Semaphore> {
        if let Some(entry) = self.per_upstream.get(upstream_key) {
            return entry.value().clone();
        }
        self.per_upstream
            .entry(upstream_key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_conns_per_upstream)))
            .clone()
    }

    pub fn client_available_permits(&self) -> usize {
        self.client.available_permits()
    }

    pub fn upstream_available_permits(&self, upstream_key: &str) -> usize {
        self.get_or_create(upstream_key).available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_permit_bounds_concurrency() {
        let limiter = ConnectionLimiter::new(2, 10);
        let p1 = limiter.acquire_client().await;
        let p2 = limiter.acquire_client().await;
        assert_eq!(limiter.client_available_permits(), 0);
        drop(p1);
        assert_eq!(limiter.client_available_permits(), 1);
        drop(p2);
    }

    #[tokio::test]
    async fn test_per_upstream_permits_are_independent() {
        let limiter = ConnectionLimiter::new(10, 1);
        let a = limiter.acquire_upstream("a:80").await;
        // b:80 has its own permit pool, unaffected by a:80 being exhausted.
        let b = limiter.acquire_upstream("b:80").await;
        assert_eq!(limiter.upstream_available_permits("a:80"), 0);
        assert_eq!(limiter.upstream_available_permits("b:80"), 0);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn test_waiting_acquire_unblocks_on_release() {
        let limiter = Arc::new(ConnectionLimiter::new(1, 10));
        let permit = limiter.acquire_client().await;

        let limiter2 = limiter.clone();
        let waiter = tokio::spawn(async move {
            let _p = limiter2.acquire_client().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(permit);
        waiter.await.unwrap();
    }
}
