use crate::protocol::{ChannelError, Message};

/// The outcome of firing one event through a pipeline.
///
/// - `inbound`: messages that fell off the tail without being consumed
/// - `outbound`: messages that left the head and must be written to the transport
/// - `errors`: failures no handler consumed
/// - `close_requested`: some handler asked the channel to close
#[derive(Debug, Default)]
pub struct Dispatch {
    pub(crate) inbound: Vec<Message>,
    pub(crate) outbound: Vec<Message>,
    pub(crate) errors: Vec<ChannelError>,
    pub(crate) close_requested: bool,
}

impl Dispatch {
    pub fn inbound(&self) -> &[Message] {
        &self.inbound
    }

    pub fn outbound(&self) -> &[Message] {
        &self.outbound
    }

    pub fn errors(&self) -> &[ChannelError] {
        &self.errors
    }

    #[inline]
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Takes the messages that reached the tail
    pub fn take_inbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.inbound)
    }

    /// Takes the messages that must be written to the transport
    pub fn take_outbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbound)
    }

    /// Takes the failures nobody handled
    pub fn take_errors(&mut self) -> Vec<ChannelError> {
        std::mem::take(&mut self.errors)
    }
}
