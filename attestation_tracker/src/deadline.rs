use core::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A point in time after which outstanding work should be abandoned.
///
/// A deadline also expires early when the [`CancellationToken`] it was derived from is
/// cancelled. Clones share the same instant and token.
#[derive(Clone, Debug)]
pub struct Deadline {
    instant: Instant,
    token: CancellationToken,
}

impl Deadline {
    #[must_use]
    pub fn after(duration: Duration) -> Self {
        Self::at(Instant::now() + duration)
    }

    #[must_use]
    pub fn at(instant: Instant) -> Self {
        Self {
            instant,
            token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(self, token: &CancellationToken) -> Self {
        Self {
            instant: self.instant,
            token: token.child_token(),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.instant
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.instant.saturating_duration_since(Instant::now())
    }

    /// Completes when the deadline passes or the token is cancelled.
    pub async fn expired(&self) {
        tokio::select! {
            () = tokio::time::sleep_until(self.instant) => {}
            () = self.token.cancelled() => {}
        }
    }

    /// Runs `future` to completion unless the deadline expires first.
    ///
    /// Returns `None` without polling `future` if the deadline has already expired.
    pub async fn run<F: Future>(&self, future: F) -> Option<F::Output> {
        if self.is_expired() {
            return None;
        }

        tokio::select! {
            biased;

            output = future => Some(output),
            () = self.expired() => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_output_before_deadline() {
        let deadline = Deadline::after(Duration::from_secs(5));

        assert_eq!(deadline.run(async { 42 }).await, Some(42));
        assert!(!deadline.is_expired());
    }

    #[tokio::test]
    async fn run_abandons_future_after_deadline() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let slow = tokio::time::sleep(Duration::from_secs(5));

        assert_eq!(deadline.run(slow).await, None);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn run_does_not_start_work_after_expiry() {
        let deadline = Deadline::after(Duration::ZERO);
        let mut polled = false;

        let output = deadline
            .run(async {
                polled = true;
            })
            .await;

        assert_eq!(output, None);
        assert!(!polled);
    }

    #[tokio::test]
    async fn cancelling_parent_token_expires_deadline() {
        let shutdown = CancellationToken::new();
        let deadline = Deadline::after(Duration::from_secs(60)).with_cancellation(&shutdown);

        assert!(!deadline.is_expired());

        shutdown.cancel();

        assert!(deadline.is_expired());
        assert_eq!(deadline.run(async { 1 }).await, None);
    }
}
