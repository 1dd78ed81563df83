//! Per-epoch cancellation.
//!
//! Cancellation is cooperative: raising a token does not interrupt an external
//! call in progress. Every await on a transcription, generation or synthesis
//! call is raced against [`EpochToken::cancelled`], and the losing future is
//! dropped. Work already handed to a remote engine may still run to completion
//! on the remote side; its result is discarded.

use tokio_util::sync::CancellationToken;

/// Cancellation token bound to one turn epoch. Never reused across epochs.
#[derive(Debug, Clone)]
pub struct EpochToken {
    epoch: u64,
    token: CancellationToken,
}

impl EpochToken {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            token: CancellationToken::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Raises the token. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Completes once the token is raised.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Resolves with the epoch once it has been cancelled, so long-running
    /// collaborators can observe cancellation without polling.
    pub async fn on_cancelled(&self) -> u64 {
        self.token.cancelled().await;
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_on_cancelled_reports_epoch() {
        let token = EpochToken::new(7);
        let observer = token.clone();
        let waiter = tokio::spawn(async move { observer.on_cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();

        assert_eq!(waiter.await.unwrap(), 7);
        assert!(token.is_cancelled());
    }
}
