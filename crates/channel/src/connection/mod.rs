//! Socket-level connection handling
//!
//! This module binds a [`Channel`](crate::channel::Channel) to an actual socket. It is
//! the only place where bytes cross between the transport and a pipeline.
//!
//! # Components
//!
//! - `ChannelConnection`: owns the framed read and write halves of one socket
//!   - reads inbound chunks and fires them through the pipeline
//!   - writes and flushes whatever leaves the pipeline head
//!   - stops reading as soon as the channel starts closing
//! - `drive`: the task body an event loop worker runs per channel, including the
//!   ordered release of the socket, the handlers and the close signal

mod channel_connection;

pub(crate) use channel_connection::drive;
