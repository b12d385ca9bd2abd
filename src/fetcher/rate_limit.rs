use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::trace;

/// Per-domain minimum-interval gate.
///
/// Each registrable domain gets its own async mutex around the timestamp of
/// the last request issued to it; concurrent callers for the same domain queue
/// on that lock, callers for different domains never touch each other.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<DashMap<String, Arc<Mutex<DomainState>>>>,
    min_interval: Duration,
}

#[derive(Debug, Default)]
struct DomainState {
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            state: Arc::new(DashMap::new()),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until `min_interval` has elapsed since the previous request to
    /// `domain`, then record now as the latest request time.
    pub async fn acquire(&self, domain: &str) {
        let slot = self
            .state
            .entry(domain.to_string())
            .or_default()
            .value()
            .clone();

        let mut state = slot.lock().await;
        if let Some(last) = state.last_request {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                trace!(domain, wait_ms = (ready_at - Instant::now()).as_millis() as u64, "rate limited");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        state.last_request = Some(Instant::now());
    }

    /// Number of domains seen so far.
    pub fn tracked_domains(&self) -> usize {
        self.state.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_same_domain_is_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(600));
        let start = Instant::now();

        let a = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.acquire("example.com").await;
                Instant::now()
            })
        };
        let b = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.acquire("example.com").await;
                Instant::now()
            })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let (first, second) = if a <= b { (a, b) } else { (b, a) };

        assert_eq!(first, start);
        assert!(second - first >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_domains_do_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(600));
        let start = Instant::now();

        limiter.acquire("reuters.com").await;
        limiter.acquire("yahoo.com").await;

        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.tracked_domains(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_requests_accumulate() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire("example.com").await;
        }

        assert!(Instant::now() - start >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_elapsed() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        limiter.acquire("example.com").await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let before = Instant::now();
        limiter.acquire("example.com").await;
        assert_eq!(Instant::now(), before);
    }
}
