//! Keepalive deadline shared by the reader and writer drainers.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// A single re-armable expiry applied to both directions of a connection.
///
/// [`refresh`](Deadline::refresh) installs `now + keepalive * 1.5` (the
/// tolerance MQTT 3.1.1 mandates); a keepalive of zero clears the deadline
/// entirely. Each drainer awaits [`expired`](Deadline::expired) alongside
/// its I/O so an idle connection times out even while blocked.
#[derive(Debug)]
pub struct Deadline {
    expiry: watch::Sender<Option<Instant>>,
}

impl Deadline {
    pub fn new() -> Self {
        Self {
            expiry: watch::Sender::new(None),
        }
    }

    /// Re-arm the deadline from a keepalive in seconds. Zero disables it.
    pub fn refresh(&self, keepalive: u16) {
        let expiry = (keepalive > 0).then(|| {
            let tolerance = u64::from(keepalive) + u64::from(keepalive / 2);
            Instant::now() + Duration::from_secs(tolerance)
        });
        self.expiry.send_replace(expiry);
    }

    /// Resolves once the current expiry passes without being re-armed.
    /// Pends forever while no deadline is installed.
    pub async fn expired(&self) {
        let mut rx = self.expiry.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            match current {
                None => {
                    if rx.changed().await.is_err() {
                        // Deadline dropped; nothing left to enforce.
                        std::future::pending::<()>().await;
                    }
                }
                Some(at) => {
                    tokio::select! {
                        () = sleep_until(at) => {
                            // Only fire if no refresh moved the expiry while
                            // we slept.
                            if *rx.borrow_and_update() == Some(at) {
                                return;
                            }
                        }
                        changed = rx.changed() => {
                            if changed.is_err() {
                                std::future::pending::<()>().await;
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_at_one_and_a_half_times_keepalive() {
        let deadline = Deadline::new();
        deadline.refresh(60);

        let start = Instant::now();
        deadline.expired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_pushes_the_expiry_out() {
        let deadline = std::sync::Arc::new(Deadline::new());
        deadline.refresh(10);

        let waiter = {
            let deadline = std::sync::Arc::clone(&deadline);
            tokio::spawn(async move {
                let start = Instant::now();
                deadline.expired().await;
                start.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        deadline.refresh(10);

        let elapsed = waiter.await.unwrap();
        assert_eq!(elapsed, Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_keepalive_never_fires() {
        let deadline = Deadline::new();
        deadline.refresh(0);

        let result = tokio::time::timeout(Duration::from_secs(3600), deadline.expired()).await;
        assert!(result.is_err(), "disabled deadline must not fire");
    }
}
