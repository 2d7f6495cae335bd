use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Token-bucket pacing for outbound service calls (burst of one).
///
/// The refill task stops once the last clone is dropped.
#[derive(Clone)]
pub struct RateLimiter {
    sem: Arc<Semaphore>,
    _refill: Arc<DropGuard>,
}

impl RateLimiter {
    /// Must be called from within a tokio runtime.
    pub fn new(tokens_per_sec: u32) -> Self {
        let sem = Arc::new(Semaphore::new(1));
        let sem_bg = sem.clone();
        let stop = CancellationToken::new();
        let stop_bg = stop.clone();
        let interval_ms = (1000u32 / tokens_per_sec.max(1)).max(1) as u64;
        tokio::spawn(async move {
            let mut t = tokio::time::interval(Duration::from_millis(interval_ms));
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_bg.cancelled() => break,
                    _ = t.tick() => {
                        if sem_bg.available_permits() == 0 {
                            sem_bg.add_permits(1);
                        }
                    }
                }
            }
        });
        RateLimiter { sem, _refill: Arc::new(stop.drop_guard()) }
    }

    pub async fn acquire(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn paces_after_first_token() {
        let rl = RateLimiter::new(20);
        let started = Instant::now();
        for _ in 0..4 {
            rl.acquire().await;
        }
        // first token is immediate, the next three wait ~50ms each
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn clones_share_the_bucket() {
        let a = RateLimiter::new(1000);
        let b = a.clone();
        a.acquire().await;
        b.acquire().await;
    }
}
