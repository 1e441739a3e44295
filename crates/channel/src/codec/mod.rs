//! Streaming decoder capability
//!
//! A decoder turns one inbound message into at most one message. It is the shape every
//! codec layer of a pipeline shares, whatever it actually does with the bytes: inflate
//! them, cut them into frames, decrypt them.
//!
//! # Components
//!
//! - [`MessageDecoder`]: the capability, `decode(msg) -> Option<msg>`
//! - [`DecoderHandler`]: adapts any decoder into a pipeline [`Handler`]
//!
//! # Example
//!
//! ```
//! use micro_channel::codec::{DecoderHandler, MessageDecoder};
//! use micro_channel::pipeline::Pipeline;
//! use micro_channel::protocol::{BoxError, Message};
//!
//! struct Trim;
//!
//! impl MessageDecoder for Trim {
//!     type Error = BoxError;
//!
//!     fn decode(&self, msg: Message) -> Result<Option<Message>, Self::Error> {
//!         match msg {
//!             Message::Buffer(buf) if buf.is_empty() => Ok(None),
//!             other => Ok(Some(other)),
//!         }
//!     }
//! }
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add_last("trim", DecoderHandler::new(Trim)).unwrap();
//! ```

mod decoder;

pub use decoder::DecoderHandler;
pub use decoder::MessageDecoder;
