//! Resource limiting for the upload pipeline
//!
//! Three independent mechanisms live here:
//!
//! 1. **Fan-out budget** ([`Budget`]) - caps how many concurrent sub-tasks a recursive or
//!    paged producer may spawn. When the budget is exhausted the caller is expected to do the
//!    work inline instead of spawning, so progress never depends on a permit becoming free.
//! 2. **Open files limit** - caps the number of local files held open by uploads at once.
//! 3. **Operations throttle** - caps the number of remote write requests issued per second.
//!
//! The open files limit and the operations throttle are process-wide and disabled until
//! configured with a non-zero value.
//!
//! # Operations throttling
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! # async fn example() {
//! // 50 requests per second: 5 tokens every 100ms
//! throttle::init_ops_tokens(5);
//! tokio::spawn(throttle::run_ops_replenish_thread(5, Duration::from_millis(100)));
//!
//! throttle::get_ops_token().await;
//! // issue the request here
//! # }
//! ```
//!
//! # Fan-out budget
//!
//! ```rust
//! let budget = throttle::Budget::new(1);
//! let first = budget.try_claim();
//! assert!(first.is_some());
//! // the only permit is taken, the caller has to do the next piece of work inline
//! assert!(budget.try_claim().is_none());
//! drop(first);
//! assert!(budget.try_claim().is_some());
//! ```

mod semaphore;

static OPEN_FILES_LIMIT: semaphore::Limiter = semaphore::Limiter::new();
static OPS_THROTTLE: semaphore::Limiter = semaphore::Limiter::new();

/// Shared cap on the number of concurrently spawned sub-tasks.
#[derive(Clone, Debug)]
pub struct Budget {
    permits: std::sync::Arc<tokio::sync::Semaphore>,
}

impl Budget {
    /// A budget of zero never grants a permit.
    pub fn new(width: usize) -> Self {
        Self {
            permits: std::sync::Arc::new(tokio::sync::Semaphore::new(width)),
        }
    }

    /// Claims one slot without waiting. The slot is released when the permit is dropped, so
    /// it should be moved into the spawned task.
    pub fn try_claim(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }
}

pub fn set_max_open_files(max_open_files: usize) {
    OPEN_FILES_LIMIT.configure(max_open_files);
}

pub struct OpenFileGuard {
    _permit: Option<tokio::sync::SemaphorePermit<'static>>,
}

pub async fn open_file_permit() -> OpenFileGuard {
    OpenFileGuard {
        _permit: OPEN_FILES_LIMIT.permit().await,
    }
}

pub fn init_ops_tokens(ops_tokens: usize) {
    OPS_THROTTLE.configure(ops_tokens);
}

pub async fn get_ops_token() {
    OPS_THROTTLE.take().await;
}

pub async fn run_ops_replenish_thread(replenish: usize, interval: std::time::Duration) {
    OPS_THROTTLE.refill_every(replenish, interval).await;
}

/// Splits a per-second rate into a (tokens, interval) refill schedule.
///
/// Multiples of 10/s are refilled every 100ms; any other rate gets the full second's worth of
/// tokens once per second, so the refill rate always equals `ops_per_second`.
pub fn ops_schedule(ops_per_second: usize) -> Option<(usize, std::time::Duration)> {
    match ops_per_second {
        0 => None,
        rate if rate % 10 == 0 => Some((rate / 10, std::time::Duration::from_millis(100))),
        rate => Some((rate, std::time::Duration::from_secs(1))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_for_fast_rates() {
        assert_eq!(
            ops_schedule(250),
            Some((25, std::time::Duration::from_millis(100)))
        );
    }

    #[test]
    fn schedule_for_slow_rates() {
        assert_eq!(ops_schedule(4), Some((4, std::time::Duration::from_secs(1))));
        assert_eq!(ops_schedule(0), None);
    }

    #[test]
    fn schedule_keeps_the_exact_rate() {
        for rate in [1, 4, 10, 15, 19, 25, 250, 1001] {
            let (tokens, interval) = ops_schedule(rate).unwrap();
            let per_second = tokens as f64 / interval.as_secs_f64();
            assert!(
                (per_second - rate as f64).abs() < 1e-9,
                "rate {rate} -> {tokens} tokens / {interval:?} = {per_second}/s"
            );
        }
    }

    #[test]
    fn zero_budget_never_grants() {
        let budget = Budget::new(0);
        assert!(budget.try_claim().is_none());
    }

    #[tokio::test]
    async fn budget_is_shared_between_clones() {
        let budget = Budget::new(2);
        let other = budget.clone();
        let _a = budget.try_claim().unwrap();
        let _b = other.try_claim().unwrap();
        assert!(budget.try_claim().is_none());
        assert!(other.try_claim().is_none());
    }
}
