//! Tokio based transport: event loop workers, socket options, bootstraps.
//!
//! # Components
//!
//! - [`EventLoopGroup`]: fixed set of single-threaded workers that drive channels
//! - [`ServerBootstrap`] / [`ServerChannel`]: listen and register accepted sockets
//! - [`ClientBootstrap`]: connect and register outgoing sockets
//! - [`EventLoopConfig`] / [`ChannelConfig`]: worker count, close bound, socket options
//!
//! # Close bound
//!
//! A channel whose peer already went away releases its socket, tears its pipeline down
//! and settles its close signal well inside [`EventLoopConfig::close_timeout`] (500 ms by
//! default). [`EventLoopGroup::shutdown_gracefully`] reports every close that misses it
//! as [`TransportError::CloseTimeout`](crate::protocol::TransportError::CloseTimeout).

mod bootstrap;
mod config;
mod event_loop;

pub use bootstrap::{ClientBootstrap, ServerBootstrap, ServerChannel};
pub use config::{ChannelConfig, EventLoopConfig, DEFAULT_CLOSE_TIMEOUT, DEFAULT_READ_BUFFER_CAPACITY};
pub use event_loop::EventLoopGroup;
pub(crate) use event_loop::WeakGroup;
