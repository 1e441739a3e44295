use crate::protocol::Message;

/// Side effects a handler requested during one dispatch.
///
/// They are applied by the pipeline once the handler returns, so a handler never
/// re-enters the chain it is running in.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    /// Outbound writes, tagged with the index of the handler that queued them
    pub(crate) writes: Vec<(usize, Message)>,
    pub(crate) close_requested: bool,
}

/// The view a handler gets of its pipeline while it handles an event.
#[derive(Debug)]
pub struct HandlerContext<'a> {
    name: &'a str,
    index: usize,
    effects: &'a mut Effects,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(name: &'a str, index: usize, effects: &'a mut Effects) -> Self {
        Self { name, index, effects }
    }

    /// The name this handler was registered under
    pub fn name(&self) -> &str {
        self.name
    }

    /// Queues an outbound message.
    ///
    /// The message goes through the handlers in front of this one, in reverse order,
    /// after the current event has finished propagating.
    pub fn write<M: Into<Message>>(&mut self, msg: M) {
        self.effects.writes.push((self.index, msg.into()));
    }

    /// Asks the owning channel to close once the current dispatch is done.
    pub fn close(&mut self) {
        self.effects.close_requested = true;
    }
}
