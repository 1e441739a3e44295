//! An asynchronous channel and handler pipeline core
//!
//! This crate provides the event model a protocol implementation is built on: a
//! connection is a [`channel::Channel`] that owns an ordered chain of named
//! [`handler::Handler`]s, and a small tokio based transport feeds socket bytes through
//! that chain and writes whatever comes out at the other end.
//!
//! # Features
//!
//! - Name-keyed handler pipelines with deterministic inbound and outbound ordering
//! - Handler failures isolated to their channel and offered to the rest of the chain
//! - One-shot, idempotent close with a wait-able completion signal
//! - Fixed set of single-threaded event loops, one owner thread per channel
//! - Server and client bootstraps with per-connection socket options
//!
//! # Example
//!
//! ```no_run
//! use micro_channel::handler::make_handler;
//! use micro_channel::pipeline::Pipeline;
//! use micro_channel::protocol::BoxError;
//! use micro_channel::transport::{EventLoopConfig, EventLoopGroup, ServerBootstrap};
//! use tracing::{info, Level};
//! use tracing_subscriber::FmtSubscriber;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BoxError> {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber)?;
//!
//!     let group = EventLoopGroup::new(EventLoopConfig::default())?;
//!     let server = ServerBootstrap::new(group.clone())
//!         .child_pipeline(|| -> Result<Pipeline, BoxError> {
//!             let mut pipeline = Pipeline::new();
//!             pipeline.add_last("echo", make_handler(|ctx, msg| {
//!                 ctx.write(msg);
//!                 Ok(None)
//!             }))?;
//!             Ok(pipeline)
//!         })
//!         .bind("127.0.0.1:8080")?;
//!     info!(address = %server.local_addr(), "echo server started");
//!
//!     tokio::signal::ctrl_c().await?;
//!     group.shutdown_gracefully().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`protocol`]: the [`protocol::Message`] model and error types
//! - [`handler`]: the handler trait, its context and closure based handlers
//! - [`pipeline`]: the handler chain and its event dispatch
//! - [`codec`]: the streaming decoder capability and its handler adapter
//! - [`channel`]: channel handles, lifecycle state and the close signal
//! - [`transport`]: event loop workers, socket options and bootstraps
//!
//! # Error Handling
//!
//! - [`protocol::PipelineError`]: pipeline mutation errors
//! - [`protocol::ChannelError`]: failures scoped to one channel
//! - [`protocol::TransportError`]: event loop, socket and shutdown errors

pub mod channel;
pub mod codec;
pub mod handler;
pub mod pipeline;
pub mod protocol;
pub mod transport;

mod connection;
mod utils;
pub(crate) use utils::ensure;
