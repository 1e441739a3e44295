//! Handler abstractions plugged into a [`Pipeline`](crate::pipeline::Pipeline).
//!
//! A handler sees every event of exactly one channel, one event at a time. Each
//! callback gets a [`HandlerContext`] through which it can queue outbound writes or
//! ask the owning channel to close.

mod context;

pub use context::HandlerContext;
pub(crate) use context::Effects;

use crate::protocol::{BoxError, ChannelError, Message};

/// A stage of a channel pipeline.
///
/// Every method has a passthrough default, so a handler only overrides the events it
/// cares about. Returning `Ok(None)` from [`on_read`](Handler::on_read) or
/// [`on_write`](Handler::on_write) drops the event; returning `Err` turns it into a
/// channel failure that the following handlers see through [`on_error`](Handler::on_error).
pub trait Handler: Send + 'static {
    /// The channel's socket is connected.
    fn on_active(&mut self, _ctx: &mut HandlerContext<'_>) {}

    /// An inbound message arrived from the previous handler (or the socket).
    fn on_read(&mut self, _ctx: &mut HandlerContext<'_>, msg: Message) -> Result<Option<Message>, BoxError> {
        Ok(Some(msg))
    }

    /// An outbound message arrived from the next handler (or the channel).
    fn on_write(&mut self, _ctx: &mut HandlerContext<'_>, msg: Message) -> Result<Option<Message>, BoxError> {
        Ok(Some(msg))
    }

    /// A failure happened earlier in the chain. Return `None` to mark it handled.
    fn on_error(&mut self, _ctx: &mut HandlerContext<'_>, error: ChannelError) -> Option<ChannelError> {
        Some(error)
    }

    /// The channel's socket has been released.
    fn on_inactive(&mut self, _ctx: &mut HandlerContext<'_>) {}

    /// The handler left the pipeline; release everything it owns.
    ///
    /// Called exactly once, either from [`Pipeline::remove`](crate::pipeline::Pipeline::remove)
    /// or when the channel tears its pipeline down.
    fn on_removed(&mut self) {}
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn on_active(&mut self, ctx: &mut HandlerContext<'_>) {
        (**self).on_active(ctx);
    }

    fn on_read(&mut self, ctx: &mut HandlerContext<'_>, msg: Message) -> Result<Option<Message>, BoxError> {
        (**self).on_read(ctx, msg)
    }

    fn on_write(&mut self, ctx: &mut HandlerContext<'_>, msg: Message) -> Result<Option<Message>, BoxError> {
        (**self).on_write(ctx, msg)
    }

    fn on_error(&mut self, ctx: &mut HandlerContext<'_>, error: ChannelError) -> Option<ChannelError> {
        (**self).on_error(ctx, error)
    }

    fn on_inactive(&mut self, ctx: &mut HandlerContext<'_>) {
        (**self).on_inactive(ctx);
    }

    fn on_removed(&mut self) {
        (**self).on_removed();
    }
}

/// An inbound-only handler built from a closure, see [`make_handler`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: FnMut(&mut HandlerContext<'_>, Message) -> Result<Option<Message>, BoxError> + Send + 'static,
{
    fn on_read(&mut self, ctx: &mut HandlerContext<'_>, msg: Message) -> Result<Option<Message>, BoxError> {
        (self.f)(ctx, msg)
    }
}

/// Creates an inbound handler from a closure.
///
/// ```
/// use micro_channel::handler::make_handler;
/// use micro_channel::pipeline::Pipeline;
///
/// let mut pipeline = Pipeline::new();
/// pipeline
///     .add_last("echo", make_handler(|ctx, msg| {
///         ctx.write(msg);
///         Ok(None)
///     }))
///     .unwrap();
/// ```
pub fn make_handler<F>(f: F) -> HandlerFn<F>
where
    F: FnMut(&mut HandlerContext<'_>, Message) -> Result<Option<Message>, BoxError> + Send + 'static,
{
    HandlerFn { f }
}
