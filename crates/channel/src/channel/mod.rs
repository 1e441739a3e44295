//! Channel handles and their close-completion contract.
//!
//! A [`Channel`] is a cheap, cloneable handle on one connection. The connection itself
//! is driven by a single task on one event loop worker; the handle lets any thread add
//! handlers, queue writes and request a close.
//!
//! # Lifecycle
//!
//! ```text
//! OPEN ──► CONNECTED ──► CLOSING ──► CLOSED
//!   └────────────────────────┘
//! ```
//!
//! Closing is idempotent: every call to [`Channel::close`] returns a [`CloseFuture`] on
//! the same one-shot signal, settled after the socket has been released and every
//! handler has been torn down.

mod close;

pub use close::CloseFuture;
pub use close::CloseOutcome;
pub(crate) use close::CloseSignal;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::handler::Handler;
use crate::pipeline::Pipeline;
use crate::protocol::{ChannelError, Message, PipelineError};

/// Process-unique channel identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChannelState {
    Open = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Open,
            1 => ChannelState::Connected,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

struct ChannelInner {
    id: ChannelId,
    state: AtomicU8,
    pipeline: Mutex<Pipeline>,
    close_token: CancellationToken,
    signal: Arc<CloseSignal>,
    outbound: mpsc::UnboundedSender<Message>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

/// A handle on one connection and its pipeline.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Creates a channel in state OPEN, together with the receiving end of its outbound queue.
    pub(crate) fn new(
        pipeline: Pipeline,
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = ChannelInner {
            id: ChannelId::next(),
            state: AtomicU8::new(ChannelState::Open as u8),
            pipeline: Mutex::new(pipeline),
            close_token: CancellationToken::new(),
            signal: Arc::new(CloseSignal::default()),
            outbound,
            local_addr,
            peer_addr,
        };
        (Self { inner: Arc::new(inner) }, outbound_rx)
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Returns true until a close has been requested
    pub fn is_open(&self) -> bool {
        self.state() < ChannelState::Closing
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// Appends a handler to this channel's pipeline, even while traffic is flowing.
    ///
    /// Must not be called from inside one of this channel's handlers: the pipeline is
    /// locked for the whole dispatch.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::DuplicateName`] if the name is taken
    /// - [`PipelineError::TornDown`] once the channel closed and its handlers were removed
    pub fn add_last<S, H>(&self, name: S, handler: H) -> Result<(), PipelineError>
    where
        S: Into<String>,
        H: Handler,
    {
        self.inner.pipeline.lock().add_last(name, handler)
    }

    /// Runs `f` with exclusive access to the pipeline.
    ///
    /// Must not be called from inside one of this channel's handlers: the pipeline is
    /// locked for the whole dispatch.
    pub fn with_pipeline<R>(&self, f: impl FnOnce(&mut Pipeline) -> R) -> R {
        f(&mut self.inner.pipeline.lock())
    }

    /// Queues a message that will go through the whole outbound chain on the
    /// channel's worker.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] once a close has been requested.
    pub fn write<M: Into<Message>>(&self, msg: M) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        self.inner.outbound.send(msg.into()).map_err(|_closed| ChannelError::Closed)
    }

    /// Starts closing the channel and returns its completion handle.
    ///
    /// Idempotent: only the first call initiates the close, every call observes the
    /// same outcome.
    pub fn close(&self) -> CloseFuture {
        if self.begin_close() {
            debug!(channel = %self.id(), "close requested");
        }
        self.close_future()
    }

    /// The completion handle, without initiating a close
    pub fn close_future(&self) -> CloseFuture {
        CloseFuture::new(self.inner.id, Arc::clone(&self.inner.signal))
    }

    pub(crate) fn close_token(&self) -> &CancellationToken {
        &self.inner.close_token
    }

    /// OPEN -> CONNECTED; a channel that is already closing stays closing.
    pub(crate) fn mark_connected(&self) -> bool {
        self.inner
            .state
            .compare_exchange(ChannelState::Open as u8, ChannelState::Connected as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves to CLOSING and stops the read loop. Returns true for the call that did it.
    pub(crate) fn begin_close(&self) -> bool {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if current >= ChannelState::Closing as u8 {
                return false;
            }
            match self.inner.state.compare_exchange_weak(
                current,
                ChannelState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.inner.close_token.cancel();
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Tears the pipeline down, moves to CLOSED and settles the close signal.
    ///
    /// Safe to call more than once; only the first call has any effect on the signal.
    pub(crate) fn finish(&self, outcome: CloseOutcome) {
        self.begin_close();
        self.inner.pipeline.lock().teardown();
        self.inner.state.store(ChannelState::Closed as u8, Ordering::Release);
        if self.inner.signal.settle(outcome) {
            trace!(channel = %self.id(), "close completed");
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("local_addr", &self.inner.local_addr)
            .field("peer_addr", &self.inner.peer_addr)
            .finish_non_exhaustive()
    }
}

/// Settles a channel's close signal when dropped, unless it was already settled.
///
/// Moved into every channel task, so a worker that drops its tasks still tears the
/// pipeline down and wakes every waiter.
pub(crate) struct CloseGuard {
    channel: Option<Channel>,
}

impl CloseGuard {
    pub(crate) fn new(channel: Channel) -> Self {
        Self { channel: Some(channel) }
    }

    pub(crate) fn finish(mut self, outcome: CloseOutcome) {
        if let Some(channel) = self.channel.take() {
            channel.finish(outcome);
        }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!(channel = %channel.id(), "channel task dropped before closing");
            channel.finish(CloseOutcome::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountRemoved(Arc<AtomicUsize>);

    impl Handler for CountRemoved {
        fn on_removed(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let removed = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::new();
        pipeline.add_last("counter", CountRemoved(Arc::clone(&removed))).unwrap();
        let (channel, _outbound) = Channel::new(pipeline, None, None);

        let first = channel.close();
        let second = channel.close();
        assert!(!first.is_done());
        assert_eq!(channel.state(), ChannelState::Closing);
        assert!(channel.close_token().is_cancelled());

        channel.finish(CloseOutcome::Clean);
        channel.finish(CloseOutcome::Aborted);

        assert!(first.wait().await.is_clean());
        assert!(second.wait().await.is_clean());
        assert!(channel.close().wait().await.is_clean());
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_write_refused_after_close() {
        let (channel, mut outbound) = Channel::new(Pipeline::new(), None, None);

        channel.write(&b"queued"[..]).unwrap();
        assert!(outbound.try_recv().is_ok());

        let _ = channel.close();
        assert!(matches!(channel.write(&b"late"[..]), Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_handler_added_after_close_is_refused() {
        let removed = Arc::new(AtomicUsize::new(0));
        let (channel, _outbound) = Channel::new(Pipeline::new(), None, None);

        let close = channel.close();
        channel.add_last("closing", CountRemoved(Arc::clone(&removed))).unwrap();
        channel.finish(CloseOutcome::Clean);
        assert!(close.wait().await.is_clean());
        assert_eq!(removed.load(Ordering::SeqCst), 1);

        let error = channel.add_last("late", CountRemoved(Arc::clone(&removed))).unwrap_err();
        assert!(matches!(error, PipelineError::TornDown));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.with_pipeline(|pipeline| pipeline.is_empty()));
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_guard_aborts() {
        let (channel, _outbound) = Channel::new(Pipeline::new(), None, None);
        drop(CloseGuard::new(channel.clone()));

        assert!(matches!(channel.close_future().outcome(), Some(CloseOutcome::Aborted)));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_connected_only_from_open() {
        let (channel, _outbound) = Channel::new(Pipeline::new(), None, None);
        assert!(channel.mark_connected());
        assert_eq!(channel.state(), ChannelState::Connected);
        assert!(channel.begin_close());
        assert!(!channel.mark_connected());
        assert!(!channel.begin_close());
    }
}
