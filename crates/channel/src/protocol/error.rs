use crate::channel::ChannelId;
use std::error::Error;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// The type-erased error a handler may fail with.
pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("duplicate handler name: {name}")]
    DuplicateName { name: String },

    #[error("no such handler: {name}")]
    NoSuchHandler { name: String },

    #[error("pipeline was torn down")]
    TornDown,
}

impl PipelineError {
    pub fn duplicate_name<S: ToString>(name: S) -> Self {
        Self::DuplicateName { name: name.to_string() }
    }

    pub fn no_such_handler<S: ToString>(name: S) -> Self {
        Self::NoSuchHandler { name: name.to_string() }
    }
}

/// A failure scoped to a single channel.
///
/// Handler failures never travel back to the caller of a dispatch; they are turned into
/// this event and offered to the remaining handlers through `on_error`.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("handler '{handler}' failed: {source}")]
    Handler { handler: String, source: BoxError },

    #[error("channel is closed")]
    Closed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ChannelError {
    pub fn handler<S: ToString, E: Into<BoxError>>(handler: S, source: E) -> Self {
        Self::Handler { handler: handler.to_string(), source: source.into() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Returns the name of the failing handler, if this is a handler failure
    pub fn handler_name(&self) -> Option<&str> {
        match self {
            ChannelError::Handler { handler, .. } => Some(handler),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("can't build pipeline: {source}")]
    Pipeline { source: BoxError },

    #[error("failed to start event loop worker: {reason}")]
    Runtime { reason: String },

    #[error("closing channel {channel} took longer than {bound:?}")]
    CloseTimeout { channel: ChannelId, bound: Duration },

    #[error("event loop group is shut down")]
    Shutdown,
}

impl TransportError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn pipeline<E: Into<BoxError>>(e: E) -> Self {
        Self::Pipeline { source: e.into() }
    }

    pub fn runtime<S: ToString>(reason: S) -> Self {
        Self::Runtime { reason: reason.to_string() }
    }
}
