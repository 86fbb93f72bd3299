use std::collections::VecDeque;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep_until};

const ONE_MINUTE: Duration = Duration::from_secs(60);

/// Rolling-window rate limiter.
///
/// Tracks admission timestamps over a trailing window and suspends callers
/// until the window has room. The interior mutex is fair and the wait for
/// the oldest admission to age out happens with the mutex held, so
/// admissions are granted strictly in arrival order.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter admitting at most `max_per_minute` requests per rolling
    /// minute. Zero means unlimited.
    pub fn per_minute(max_per_minute: u32) -> Self {
        Self::with_window(max_per_minute, ONE_MINUTE)
    }

    pub fn with_window(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            admissions: Mutex::new(VecDeque::new()),
        }
    }

    /// Suspend until the window has capacity, then record the admission.
    pub async fn acquire(&self) {
        if self.max_per_window == 0 {
            return;
        }
        let mut admissions = self.admissions.lock().await;
        loop {
            let now = Instant::now();
            while admissions
                .front()
                .is_some_and(|&oldest| now.duration_since(oldest) >= self.window)
            {
                admissions.pop_front();
            }
            if (admissions.len() as u32) < self.max_per_window {
                admissions.push_back(now);
                return;
            }
            // the oldest admission ages out first, wait exactly until then
            let oldest = admissions[0];
            sleep_until(oldest + self.window).await;
        }
    }

    /// Admissions still inside the trailing window.
    pub async fn in_window(&self) -> usize {
        let admissions = self.admissions.lock().await;
        let now = Instant::now();
        admissions
            .iter()
            .filter(|&&at| now.duration_since(at) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admissions_under_the_limit_are_immediate() {
        let limiter = RateLimiter::per_minute(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn third_admission_waits_for_the_window() {
        let limiter = RateLimiter::per_minute(2);

        let first = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        let third = Instant::now();

        assert!(third.duration_since(first) >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn window_never_holds_more_than_the_limit() {
        let limiter = RateLimiter::with_window(3, Duration::from_secs(10));
        for _ in 0..8 {
            limiter.acquire().await;
            assert!(limiter.in_window().await <= 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_limit_means_unlimited() {
        let limiter = RateLimiter::per_minute(0);
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window().await, 0);
    }
}
