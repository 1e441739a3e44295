//! Core message and error abstractions shared by every layer of the crate.
//!
//! Everything that travels through a [`Pipeline`](crate::pipeline::Pipeline) is a
//! [`Message`]. Byte chunks read from a socket arrive as [`Message::Buffer`], and
//! handlers are free to turn them into any typed object through [`Message::Object`].
//!
//! # Architecture
//!
//! - **Message Handling** ([`message`]): the pipeline's unit of transfer
//!   - [`Message`]: either a byte buffer or an arbitrary typed object
//!
//! - **Error Handling** ([`error`]): error types for every layer
//!   - [`PipelineError`]: pipeline mutation errors
//!   - [`ChannelError`]: channel-scoped failure events
//!   - [`TransportError`]: event loop and bootstrap errors
//!   - [`BoxError`]: the type-erased error a handler may fail with
//!
//! Buffers are plain [`bytes::BytesMut`]: a growable byte sequence whose read cursor
//! moves with `advance`/`split_to` and whose write cursor moves with `put_*`. Buffers
//! are handed from stage to stage by value, never shared mutably.

mod message;
pub use message::Message;

mod error;
pub use error::BoxError;
pub use error::ChannelError;
pub use error::PipelineError;
pub use error::TransportError;
