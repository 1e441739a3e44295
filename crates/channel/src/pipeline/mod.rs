//! The ordered, name-keyed handler chain attached to every channel.
//!
//! # Event flow
//!
//! ```text
//!            fire_read                                   fire_write
//!   socket ──────────────► [A] ──► [B] ──► [C] ──► tail
//!   socket ◄────────────── [A] ◄── [B] ◄── [C] ◄──────────── channel.write()
//! ```
//!
//! - Inbound events start at the head and move in insertion order.
//! - Outbound events start at the tail and move in reverse insertion order.
//! - A handler that returns `None` stops propagation of that event.
//! - A handler that fails turns the event into a [`ChannelError`](crate::protocol::ChannelError)
//!   that is offered to the following handlers through `on_error`.
//!
//! All dispatch methods take `&mut self`: a pipeline only ever runs one event at a
//! time. The owning channel keeps it behind a mutex so handlers can be appended while
//! traffic is flowing.

mod chain;
mod dispatch;

pub use chain::Pipeline;
pub use chain::PipelineFactory;
pub use dispatch::Dispatch;
