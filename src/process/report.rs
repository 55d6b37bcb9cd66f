use crate::error::WardenError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::debug;

/// Channel carrying errors from supervisors to a top-level consumer
pub type ErrorSender = mpsc::Sender<WardenError>;

/// How long a reported error waits for room on the channel before it is dropped
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Counts errors and delivers them on the error channel without ever blocking
/// the reporter
#[derive(Debug)]
pub struct ErrorReporter {
    tx: ErrorSender,
    count: AtomicU64,
}

impl ErrorReporter {
    pub fn new(tx: ErrorSender) -> Self {
        Self {
            tx,
            count: AtomicU64::new(0),
        }
    }

    /// The underlying sender, for forwarders that deliver on their own
    pub fn sender(&self) -> ErrorSender {
        self.tx.clone()
    }

    /// Number of errors reported so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Count `err` and hand it to a background task that offers it to the
    /// channel for up to `SEND_TIMEOUT`. Must be called inside a tokio runtime.
    pub fn report(&self, err: WardenError) {
        self.count.fetch_add(1, Ordering::AcqRel);
        debug!("pre-channel error: {}", err);

        let tx = self.tx.clone();
        tokio::spawn(async move {
            match tx.send_timeout(err, SEND_TIMEOUT).await {
                Ok(()) => debug!("error submitted"),
                Err(SendTimeoutError::Timeout(e)) => {
                    debug!("error channel timed out, dropping error: {}", e)
                }
                Err(SendTimeoutError::Closed(e)) => {
                    debug!("error channel closed, dropping error: {}", e)
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_delivers() {
        let (tx, mut rx) = mpsc::channel(4);
        let reporter = ErrorReporter::new(tx);

        reporter.report(WardenError::Config("boom".to_string()));
        assert_eq!(reporter.count(), 1);

        let err = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_report_drops_when_unread() {
        let (tx, mut rx) = mpsc::channel(1);
        let reporter = ErrorReporter::new(tx);

        reporter.report(WardenError::Config("first".to_string()));
        reporter.report(WardenError::Config("second".to_string()));
        assert_eq!(reporter.count(), 2);

        // Only one fits; the other is dropped once its wait expires
        tokio::time::sleep(SEND_TIMEOUT + Duration::from_millis(300)).await;
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_report_on_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let reporter = ErrorReporter::new(tx);

        reporter.report(WardenError::Config("nobody listens".to_string()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reporter.count(), 1);
    }
}
