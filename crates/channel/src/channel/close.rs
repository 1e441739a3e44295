use std::future::IntoFuture;
use std::pin::pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::channel::ChannelId;
use crate::protocol::{ChannelError, TransportError};

/// How a close operation ended.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    /// Every resource was released in order
    Clean,
    /// The channel stopped because of an I/O or handler failure; resources are still released
    Failed(Arc<ChannelError>),
    /// The owning worker went away before the channel could close on its own
    Aborted,
}

impl CloseOutcome {
    pub(crate) fn failed(error: ChannelError) -> Self {
        Self::Failed(Arc::new(error))
    }

    #[inline]
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseOutcome::Clean)
    }
}

/// A one-shot completion signal: settled exactly once, readable any number of times.
#[derive(Debug, Default)]
pub(crate) struct CloseSignal {
    outcome: OnceLock<CloseOutcome>,
    notify: Notify,
}

impl CloseSignal {
    /// Settles the signal. Returns false if it had already been settled.
    pub(crate) fn settle(&self, outcome: CloseOutcome) -> bool {
        if self.outcome.set(outcome).is_ok() {
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    pub(crate) fn get(&self) -> Option<&CloseOutcome> {
        self.outcome.get()
    }

    pub(crate) async fn wait(&self) -> CloseOutcome {
        loop {
            let mut notified = pin!(self.notify.notified());
            // register before checking, otherwise a settle in between is missed
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }
}

/// A wait-able handle on a channel's close completion.
///
/// Dropping or timing out a wait never cancels the close itself; it keeps running on the
/// channel's worker.
#[derive(Debug, Clone)]
pub struct CloseFuture {
    channel: ChannelId,
    signal: Arc<CloseSignal>,
}

impl CloseFuture {
    pub(crate) fn new(channel: ChannelId, signal: Arc<CloseSignal>) -> Self {
        Self { channel, signal }
    }

    /// The channel this future belongs to
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Returns true once the close has fully finished
    pub fn is_done(&self) -> bool {
        self.signal.get().is_some()
    }

    /// The outcome, if the close has finished
    pub fn outcome(&self) -> Option<CloseOutcome> {
        self.signal.get().cloned()
    }

    /// Waits until the close has finished.
    pub async fn wait(&self) -> CloseOutcome {
        self.signal.wait().await
    }

    /// Waits at most `bound` for the close to finish.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CloseTimeout`] when the bound elapses first.
    pub async fn wait_timeout(&self, bound: Duration) -> Result<CloseOutcome, TransportError> {
        tokio::time::timeout(bound, self.signal.wait())
            .await
            .map_err(|_elapsed| TransportError::CloseTimeout { channel: self.channel, bound })
    }

    /// Blocks the current thread until the close has finished.
    ///
    /// Must not be called from an event loop worker: the close runs there.
    pub fn wait_blocking(&self) -> CloseOutcome {
        futures::executor::block_on(self.signal.wait())
    }
}

impl IntoFuture for CloseFuture {
    type Output = CloseOutcome;
    type IntoFuture = BoxFuture<'static, CloseOutcome>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.signal.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn future() -> CloseFuture {
        CloseFuture::new(ChannelId::next(), Arc::new(CloseSignal::default()))
    }

    #[tokio::test]
    async fn test_settles_exactly_once() {
        let future = future();
        assert!(!future.is_done());

        assert!(future.signal.settle(CloseOutcome::Clean));
        assert!(!future.signal.settle(CloseOutcome::Aborted));

        assert!(future.wait().await.is_clean());
        assert!(future.clone().await.is_clean());
        assert!(future.outcome().unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_waiters_are_woken() {
        let future = future();
        let waiter = tokio::spawn(future.clone().into_future());

        tokio::task::yield_now().await;
        future.signal.settle(CloseOutcome::Clean);

        assert!(waiter.await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_wait_timeout_reports_channel() {
        let future = future();
        let error = future.wait_timeout(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(error, TransportError::CloseTimeout { channel, .. } if channel == future.channel()));
    }

    #[test]
    fn test_wait_blocking_returns_settled_outcome() {
        let future = future();
        future.signal.settle(CloseOutcome::Aborted);
        assert!(matches!(future.wait_blocking(), CloseOutcome::Aborted));
    }
}
