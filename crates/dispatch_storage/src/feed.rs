#![forbid(unsafe_code)]

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Signal sent on the change feed after a committed roster write. Carries no
/// payload: subscribers re-fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterChanged;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("roster change feed closed")]
pub struct FeedClosed;

/// Live subscription to the roster change feed. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeFeedSubscription {
    rx: broadcast::Receiver<RosterChanged>,
}

impl ChangeFeedSubscription {
    pub fn from_receiver(rx: broadcast::Receiver<RosterChanged>) -> Self {
        Self { rx }
    }

    /// Waits for the next signal. A lagged receiver (burst larger than the
    /// channel) is reported as one signal.
    pub async fn changed(&mut self) -> Result<(), FeedClosed> {
        match self.rx.recv().await {
            Ok(RosterChanged) | Err(RecvError::Lagged(_)) => Ok(()),
            Err(RecvError::Closed) => Err(FeedClosed),
        }
    }

    /// Consumes every signal already queued and returns how many were
    /// coalesced. Closure is left for the next `changed` call to report.
    pub fn drain_pending(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.rx.try_recv() {
                Ok(RosterChanged) | Err(TryRecvError::Lagged(_)) => drained += 1,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return drained,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn at_feed_01_lagged_burst_reads_as_signal_then_drains() {
        let (tx, rx) = broadcast::channel(2);
        let mut sub = ChangeFeedSubscription::from_receiver(rx);
        for _ in 0..5 {
            tx.send(RosterChanged).unwrap();
        }
        assert_eq!(sub.changed().await, Ok(()));
        assert!(sub.drain_pending() >= 1);
        assert_eq!(sub.drain_pending(), 0);
    }

    #[tokio::test]
    async fn at_feed_02_dropped_sender_reports_closed() {
        let (tx, rx) = broadcast::channel(4);
        let mut sub = ChangeFeedSubscription::from_receiver(rx);
        drop(tx);
        assert_eq!(sub.changed().await, Err(FeedClosed));
    }
}
