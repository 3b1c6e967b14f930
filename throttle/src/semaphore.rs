use std::sync::atomic::{AtomicBool, Ordering};

/// A semaphore that is a no-op until it has been given a non-zero capacity.
pub struct Limiter {
    enabled: AtomicBool,
    sem: tokio::sync::Semaphore,
}

impl Limiter {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sem: tokio::sync::Semaphore::const_new(0),
        }
    }

    /// Resets the capacity; zero disables the limiter entirely.
    pub fn configure(&self, capacity: usize) {
        self.enabled.store(capacity > 0, Ordering::Release);
        if capacity == 0 {
            tracing::debug!("limiter disabled");
            return;
        }
        tracing::debug!(capacity, "limiter configured");
        self.sem.forget_permits(self.sem.available_permits());
        self.sem.add_permits(capacity);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Holds one unit of capacity for as long as the returned permit lives.
    pub async fn permit(&self) -> Option<tokio::sync::SemaphorePermit<'_>> {
        if !self.is_enabled() {
            return None;
        }
        // the semaphore is never closed
        self.sem.acquire().await.ok()
    }

    /// Takes one token for good; it only comes back through `refill_every`.
    pub async fn take(&self) {
        if !self.is_enabled() {
            return;
        }
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }

    /// Tops the token count back up to `tokens` once per `interval`, forever.
    pub async fn refill_every(&self, tokens: usize, interval: std::time::Duration) {
        if !self.is_enabled() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let available = self.sem.available_permits();
            if available < tokens {
                self.sem.add_permits(tokens - available);
            }
        }
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_limiter_never_blocks() {
        let limiter = Limiter::new();
        for _ in 0..100 {
            limiter.take().await;
            assert!(limiter.permit().await.is_none());
        }
    }

    #[test]
    #[tracing_test::traced_test]
    fn configuring_is_logged() {
        let limiter = Limiter::new();
        limiter.configure(8);
        assert!(limiter.is_enabled());
        assert!(logs_contain("limiter configured"));
        assert!(logs_contain("capacity=8"));
        limiter.configure(0);
        assert!(!limiter.is_enabled());
        assert!(logs_contain("limiter disabled"));
    }

    #[tokio::test]
    async fn permits_are_returned_on_drop() {
        let limiter = Limiter::new();
        limiter.configure(1);
        let first = limiter.permit().await;
        assert!(first.is_some());
        assert_eq!(limiter.sem.available_permits(), 0);
        drop(first);
        assert_eq!(limiter.sem.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_are_refilled() {
        static LIMITER: Limiter = Limiter::new();
        LIMITER.configure(2);
        LIMITER.take().await;
        LIMITER.take().await;
        assert_eq!(LIMITER.sem.available_permits(), 0);
        let refill = tokio::spawn(LIMITER.refill_every(2, std::time::Duration::from_millis(100)));
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(LIMITER.sem.available_permits(), 2);
        refill.abort();
    }
}
