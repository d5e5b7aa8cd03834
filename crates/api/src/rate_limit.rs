use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use governor::{
    clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter,
};

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Per-client-IP limiter for the public subscribe endpoint.
#[derive(Clone)]
pub struct SubscribeRateLimiter {
    limiter: Arc<KeyedLimiter>,
}

impl SubscribeRateLimiter {
    /// Allows `max_requests` per `window`, refilled evenly across the window.
    /// Zero values are clamped to one.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_requests).unwrap_or(NonZeroU32::MIN);
        let window = window.max(Duration::from_secs(1));
        let period = window / burst.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// `true` when the request may proceed.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    /// Drops clients whose quota has fully refilled. Returns how many remain.
    pub fn prune(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        self.limiter.len()
    }

    /// Prunes on a fixed interval until every other handle to the limiter is dropped.
    pub fn spawn_pruning(&self, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::downgrade(&self.limiter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                limiter.retain_recent();
                limiter.shrink_to_fit();
                debug!(tracked = limiter.len(), "pruned subscribe rate limiter");
            }
        })
    }
}

impl Default for SubscribeRateLimiter {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn burst_is_enforced_per_ip() {
        let limiter = SubscribeRateLimiter::new(2, Duration::from_secs(3600));
        let first = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let second = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert!(limiter.check(first));
        assert!(limiter.check(first));
        assert!(!limiter.check(first));
        assert!(limiter.check(second));
    }

    #[test]
    fn prune_forgets_refilled_clients() {
        let limiter = SubscribeRateLimiter::new(1, Duration::from_secs(1));
        for last in 1..=20u8 {
            assert!(limiter.check(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))));
        }
        assert_eq!(limiter.prune(), 20);
        std::thread::sleep(Duration::from_millis(1_200));
        assert_eq!(limiter.prune(), 0);
    }

    #[tokio::test]
    async fn pruning_task_stops_with_the_limiter() {
        let limiter = SubscribeRateLimiter::new(1, Duration::from_secs(1));
        let task = limiter.spawn_pruning(Duration::from_millis(10));
        drop(limiter);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn zero_limit_still_allows_one() {
        let limiter = SubscribeRateLimiter::new(0, Duration::ZERO);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(limiter.check(ip));
    }
}
