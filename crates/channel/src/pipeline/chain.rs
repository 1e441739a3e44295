use std::fmt;
use std::mem;

use tracing::{trace, warn};

use crate::ensure;
use crate::handler::{Effects, Handler, HandlerContext};
use crate::pipeline::Dispatch;
use crate::protocol::{BoxError, ChannelError, Message, PipelineError};

struct Entry {
    name: String,
    handler: Box<dyn Handler>,
}

/// An ordered chain of uniquely named handlers.
#[derive(Default)]
pub struct Pipeline {
    entries: Vec<Entry>,
    torn_down: bool,
}

impl Pipeline {
    /// Creates an empty pipeline
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a handler at the tail of the chain.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::DuplicateName`] if a handler with the same name is already
    ///   registered; the pipeline is left untouched
    /// - [`PipelineError::TornDown`] once [`teardown`](Self::teardown) ran
    pub fn add_last<S, H>(&mut self, name: S, handler: H) -> Result<(), PipelineError>
    where
        S: Into<String>,
        H: Handler,
    {
        ensure!(!self.torn_down, PipelineError::TornDown);
        let name = name.into();
        ensure!(!self.contains(&name), PipelineError::duplicate_name(name));
        trace!(handler = %name, position = self.entries.len(), "add handler last");
        self.entries.push(Entry { name, handler: Box::new(handler) });
        Ok(())
    }

    /// Inserts a handler at the head of the chain.
    ///
    /// # Errors
    ///
    /// Same as [`add_last`](Self::add_last).
    pub fn add_first<S, H>(&mut self, name: S, handler: H) -> Result<(), PipelineError>
    where
        S: Into<String>,
        H: Handler,
    {
        ensure!(!self.torn_down, PipelineError::TornDown);
        let name = name.into();
        ensure!(!self.contains(&name), PipelineError::duplicate_name(name));
        trace!(handler = %name, "add handler first");
        self.entries.insert(0, Entry { name, handler: Box::new(handler) });
        Ok(())
    }

    /// Detaches a handler, runs its `on_removed` hook and hands it back.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoSuchHandler`] if no handler has this name.
    pub fn remove(&mut self, name: &str) -> Result<Box<dyn Handler>, PipelineError> {
        let index = self.position(name).ok_or_else(|| PipelineError::no_such_handler(name))?;
        let mut entry = self.entries.remove(index);
        entry.handler.on_removed();
        Ok(entry.handler)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// The handler names, head first
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.name == name)
    }

    /// Fires "channel active" at every handler, head first.
    pub fn fire_active(&mut self) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let mut effects = Effects::default();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let mut ctx = HandlerContext::new(&entry.name, index, &mut effects);
            entry.handler.on_active(&mut ctx);
        }
        self.apply(effects, &mut dispatch);
        dispatch
    }

    /// Fires "channel inactive" at every handler, head first.
    pub fn fire_inactive(&mut self) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let mut effects = Effects::default();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let mut ctx = HandlerContext::new(&entry.name, index, &mut effects);
            entry.handler.on_inactive(&mut ctx);
        }
        self.apply(effects, &mut dispatch);
        dispatch
    }

    /// Sends an inbound message from the head towards the tail.
    pub fn fire_read<M: Into<Message>>(&mut self, msg: M) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let mut effects = Effects::default();
        self.read_from(0, msg.into(), &mut effects, &mut dispatch);
        self.apply(effects, &mut dispatch);
        dispatch
    }

    /// Sends an outbound message from the tail towards the head.
    pub fn fire_write<M: Into<Message>>(&mut self, msg: M) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let mut effects = Effects::default();
        self.write_from(self.entries.len(), msg.into(), &mut effects, &mut dispatch);
        self.apply(effects, &mut dispatch);
        dispatch
    }

    /// Offers a failure to every handler, head first.
    pub fn fire_error(&mut self, error: ChannelError) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let mut effects = Effects::default();
        self.error_from(0, error, &mut effects, &mut dispatch);
        self.apply(effects, &mut dispatch);
        dispatch
    }

    /// Detaches every handler and runs its `on_removed` hook, head first.
    ///
    /// Runs at most once; later calls are no-ops.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        for mut entry in mem::take(&mut self.entries) {
            trace!(handler = %entry.name, "remove handler");
            entry.handler.on_removed();
        }
    }

    fn read_from(&mut self, start: usize, msg: Message, effects: &mut Effects, dispatch: &mut Dispatch) {
        let mut current = msg;
        for index in start..self.entries.len() {
            let entry = &mut self.entries[index];
            let mut ctx = HandlerContext::new(&entry.name, index, effects);
            match entry.handler.on_read(&mut ctx, current) {
                Ok(Some(next)) => current = next,
                Ok(None) => {
                    trace!(handler = %entry.name, "inbound event consumed");
                    return;
                }
                Err(e) => {
                    let error = ChannelError::handler(&entry.name, e);
                    self.error_from(index + 1, error, effects, dispatch);
                    return;
                }
            }
        }
        dispatch.inbound.push(current);
    }

    /// Walks handlers `end - 1 ..= 0`.
    fn write_from(&mut self, end: usize, msg: Message, effects: &mut Effects, dispatch: &mut Dispatch) {
        let mut current = msg;
        for index in (0..end).rev() {
            let entry = &mut self.entries[index];
            let mut ctx = HandlerContext::new(&entry.name, index, effects);
            match entry.handler.on_write(&mut ctx, current) {
                Ok(Some(next)) => current = next,
                Ok(None) => {
                    trace!(handler = %entry.name, "outbound event consumed");
                    return;
                }
                Err(e) => {
                    let error = ChannelError::handler(&entry.name, e);
                    self.error_from(0, error, effects, dispatch);
                    return;
                }
            }
        }
        dispatch.outbound.push(current);
    }

    fn error_from(&mut self, start: usize, error: ChannelError, effects: &mut Effects, dispatch: &mut Dispatch) {
        let mut current = error;
        for index in start..self.entries.len() {
            let entry = &mut self.entries[index];
            let mut ctx = HandlerContext::new(&entry.name, index, effects);
            match entry.handler.on_error(&mut ctx, current) {
                Some(next) => current = next,
                None => return,
            }
        }
        warn!(cause = %current, "channel failure reached the tail of the pipeline");
        dispatch.errors.push(current);
    }

    /// Applies queued writes and close requests until handlers stop producing new ones.
    fn apply(&mut self, mut effects: Effects, dispatch: &mut Dispatch) {
        loop {
            dispatch.close_requested |= mem::take(&mut effects.close_requested);
            if effects.writes.is_empty() {
                return;
            }

            for (origin, msg) in mem::take(&mut effects.writes) {
                self.write_from(origin, msg, &mut effects, dispatch);
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("handlers", &self.names()).field("torn_down", &self.torn_down).finish()
    }
}

/// Builds a fresh pipeline for every channel a bootstrap creates.
pub trait PipelineFactory: Send + Sync + 'static {
    /// # Errors
    ///
    /// Any error aborts the channel before it is registered.
    fn new_pipeline(&self) -> Result<Pipeline, BoxError>;
}

impl<F> PipelineFactory for F
where
    F: Fn() -> Result<Pipeline, BoxError> + Send + Sync + 'static,
{
    fn new_pipeline(&self) -> Result<Pipeline, BoxError> {
        (self)()
    }
}
