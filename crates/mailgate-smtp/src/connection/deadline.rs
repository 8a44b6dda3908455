//! Deadlines for suspension points.
//!
//! A session suspends only while waiting for bytes and during the TLS
//! handshake. Each wait runs under a [`Deadline`] so a silent peer cannot
//! hold a connection open.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// A point in time after which a pending operation is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Creates a deadline `limit` from now.
    #[must_use]
    pub fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
        }
    }

    /// Returns the instant at which the deadline expires.
    #[must_use]
    pub const fn instant(&self) -> Instant {
        self.at
    }

    /// Returns the time left, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Runs a fallible operation, failing with [`Error::Timeout`] on expiry.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error or [`Error::Timeout`].
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout_at(self.at, operation)
            .await
            .map_err(|_| Error::Timeout)?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_operation_within_deadline() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let value = deadline
            .run(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(!deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_times_out() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let result: Result<()> = deadline
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_error_passes_through() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let result: Result<()> = deadline.run(async { Err(Error::ConnectionClosed) }).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
