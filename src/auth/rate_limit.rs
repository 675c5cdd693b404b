//! Shared "do not send before" deadline.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Monotone rate-limit deadline shared by REST calls and event streams.
///
/// Pushes only ever move the deadline later; concurrent pushes converge to
/// the maximum requested instant.
#[derive(Debug)]
pub struct RateLimit {
    deadline: watch::Sender<Option<Instant>>,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimit {
    pub fn new() -> Self {
        let (deadline, _) = watch::channel(None);
        Self { deadline }
    }

    /// Current deadline, if one is set (it may already be in the past).
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.borrow()
    }

    /// Push the deadline to at least `now + delay`. Returns whether it moved.
    pub fn push(&self, delay: Duration) -> bool {
        self.push_until(Instant::now() + delay)
    }

    pub fn push_until(&self, until: Instant) -> bool {
        self.deadline.send_if_modified(|current| match current {
            Some(existing) if *existing >= until => false,
            _ => {
                *current = Some(until);
                true
            }
        })
    }

    /// Suspend until the deadline has passed, following later pushes.
    pub async fn wait(&self) {
        let mut rx = self.deadline.subscribe();
        loop {
            let deadline = *rx.borrow_and_update();
            match deadline {
                Some(until) if until > Instant::now() => {
                    tracing::debug!(
                        wait_ms = (until - Instant::now()).as_millis() as u64,
                        "waiting out rate limit"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep_until(until) => {}
                        _ = rx.changed() => {}
                    }
                }
                _ => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn push_never_moves_deadline_earlier() {
        let limit = RateLimit::new();
        assert!(limit.push(Duration::from_secs(30)));
        let first = limit.deadline().unwrap();
        assert!(!limit.push(Duration::from_secs(10)));
        assert_eq!(limit.deadline(), Some(first));
        assert!(limit.push(Duration::from_secs(45)));
        assert!(limit.deadline().unwrap() > first);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_pushes_converge_to_maximum() {
        let limit = Arc::new(RateLimit::new());
        let start = Instant::now();
        let mut tasks = Vec::new();
        for secs in [5u64, 90, 30, 60, 1] {
            let limit = limit.clone();
            tasks.push(tokio::spawn(async move {
                limit.push(Duration::from_secs(secs));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(limit.deadline(), Some(start + Duration::from_secs(90)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_immediately_without_deadline() {
        let limit = RateLimit::new();
        let start = Instant::now();
        limit.wait().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_holds_until_retry_after_elapses() {
        let limit = Arc::new(RateLimit::new());
        limit.push(Duration::from_secs(30));
        let start = Instant::now();

        let waiter = {
            let limit = limit.clone();
            tokio::spawn(async move { limit.wait().await })
        };
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!waiter.is_finished());

        waiter.await.unwrap();
        assert!(Instant::now() - start >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_follows_a_later_push() {
        let limit = Arc::new(RateLimit::new());
        limit.push(Duration::from_secs(10));
        let start = Instant::now();

        let waiter = {
            let limit = limit.clone();
            tokio::spawn(async move { limit.wait().await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        limit.push(Duration::from_secs(20));

        waiter.await.unwrap();
        assert!(Instant::now() - start >= Duration::from_secs(25));
    }
}
