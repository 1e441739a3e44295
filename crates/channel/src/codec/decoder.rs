use std::sync::Arc;

use crate::handler::{Handler, HandlerContext};
use crate::protocol::{BoxError, Message};

/// A one-to-one streaming decoder.
///
/// `decode` takes `&self` so a decoder can be shared through an [`Arc`] between the
/// pipeline that drives it and out-of-band callers such as health checks; decoders with
/// mutable state guard it themselves.
pub trait MessageDecoder: Send + Sync {
    type Error: Into<BoxError>;

    /// Decodes one message.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(_))`: the decoded message, or the input unchanged if it is not for this decoder
    /// - `Ok(None)`: nothing to emit yet, propagation stops for this event
    /// - `Err(_)`: the input can't be decoded; the failure is fatal for the channel
    ///
    /// # Errors
    ///
    /// Implementation specific, see the concrete decoder.
    fn decode(&self, msg: Message) -> Result<Option<Message>, Self::Error>;

    /// Releases every resource the decoder holds. Called once the decoder leaves its pipeline.
    fn release(&self) {}
}

impl<D: MessageDecoder + ?Sized> MessageDecoder for Arc<D> {
    type Error = D::Error;

    fn decode(&self, msg: Message) -> Result<Option<Message>, Self::Error> {
        (**self).decode(msg)
    }

    fn release(&self) {
        (**self).release();
    }
}

/// Plugs a [`MessageDecoder`] into a pipeline as an inbound handler.
#[derive(Debug)]
pub struct DecoderHandler<D> {
    decoder: D,
}

impl<D> DecoderHandler<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }
}

impl<D> Handler for DecoderHandler<D>
where
    D: MessageDecoder + 'static,
{
    fn on_read(&mut self, _ctx: &mut HandlerContext<'_>, msg: Message) -> Result<Option<Message>, BoxError> {
        self.decoder.decode(msg).map_err(Into::into)
    }

    fn on_removed(&mut self) {
        self.decoder.release();
    }
}
